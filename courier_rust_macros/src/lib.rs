mod message;

use proc_macro::TokenStream;

use message::Contract;

// ============================================================================
// Message contract derives
// ============================================================================

/// Derive macro that declares a struct as a bus command.
///
/// Implements `courier_rust::BusMessage` and `courier_rust::BusCommand`.
/// A command has exactly one handler and is sent point-to-point to the queue
/// derived from its message type name.
///
/// # Usage
///
/// ```ignore
/// #[derive(Serialize, Deserialize, BusCommand)]
/// #[bus(name = "orders.place")]
/// pub struct PlaceOrder {
///     pub order_id: String,
/// }
/// ```
///
/// Without `#[bus(name = ...)]` the message type name defaults to the
/// type's full module path, e.g. `my_app::orders::PlaceOrder`.
#[proc_macro_derive(BusCommand, attributes(bus))]
pub fn derive_bus_command(input: TokenStream) -> TokenStream {
    message::derive_contract(input, Contract::Command)
}

/// Derive macro that declares a struct as a bus event.
///
/// Implements `courier_rust::BusMessage` and `courier_rust::BusEvent`.
/// Events are published to a topic and fan out to every registered handler.
///
/// ```ignore
/// #[derive(Serialize, Deserialize, BusEvent)]
/// #[bus(name = "orders.placed")]
/// pub struct OrderPlaced {
///     pub order_id: String,
/// }
/// ```
#[proc_macro_derive(BusEvent, attributes(bus))]
pub fn derive_bus_event(input: TokenStream) -> TokenStream {
    message::derive_contract(input, Contract::Event)
}

/// Derive macro that declares a struct as a bus request.
///
/// Requires `#[bus(response = Type)]`, the type the single request handler
/// answers with.
///
/// ```ignore
/// #[derive(Serialize, Deserialize, BusRequest)]
/// #[bus(name = "pricing.quote", response = Quote)]
/// pub struct GetQuote {
///     pub sku: String,
/// }
/// ```
#[proc_macro_derive(BusRequest, attributes(bus))]
pub fn derive_bus_request(input: TokenStream) -> TokenStream {
    message::derive_contract(input, Contract::Request)
}
