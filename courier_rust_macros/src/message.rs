use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr, Type};

/// Which capability trait a derive targets.
#[derive(Clone, Copy)]
pub enum Contract {
    Command,
    Event,
    Request,
}

struct BusAttrs {
    name: Option<LitStr>,
    response: Option<Type>,
}

pub fn derive_contract(input: TokenStream, contract: Contract) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match expand(&input, contract) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn expand(input: &DeriveInput, contract: Contract) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let attrs = parse_bus_attrs(input)?;

    // Default: fully qualified path of the type at the derive site.
    let message_type = match &attrs.name {
        Some(lit) => quote! { #lit },
        None => {
            let ident = name.to_string();
            quote! { concat!(module_path!(), "::", #ident) }
        }
    };

    let kind = match contract {
        Contract::Command => quote! { ::courier_rust::MessageKind::Command },
        Contract::Event => quote! { ::courier_rust::MessageKind::Event },
        Contract::Request => quote! { ::courier_rust::MessageKind::Request },
    };

    let capability = match contract {
        Contract::Command => {
            if attrs.response.is_some() {
                return Err(syn::Error::new_spanned(
                    name,
                    "`response` is only valid on #[derive(BusRequest)]",
                ));
            }
            quote! {
                impl #impl_generics ::courier_rust::BusCommand for #name #ty_generics #where_clause {}
            }
        }
        Contract::Event => {
            if attrs.response.is_some() {
                return Err(syn::Error::new_spanned(
                    name,
                    "`response` is only valid on #[derive(BusRequest)]",
                ));
            }
            quote! {
                impl #impl_generics ::courier_rust::BusEvent for #name #ty_generics #where_clause {}
            }
        }
        Contract::Request => {
            let response = attrs.response.ok_or_else(|| {
                syn::Error::new_spanned(
                    name,
                    "#[derive(BusRequest)] requires #[bus(response = Type)]",
                )
            })?;
            quote! {
                impl #impl_generics ::courier_rust::BusRequest for #name #ty_generics #where_clause {
                    type Response = #response;
                }
            }
        }
    };

    Ok(quote! {
        impl #impl_generics ::courier_rust::BusMessage for #name #ty_generics #where_clause {
            const MESSAGE_TYPE: &'static str = #message_type;
            const KIND: ::courier_rust::MessageKind = #kind;
        }

        #capability
    })
}

fn parse_bus_attrs(input: &DeriveInput) -> syn::Result<BusAttrs> {
    let mut attrs = BusAttrs {
        name: None,
        response: None,
    };

    for attr in &input.attrs {
        if !attr.path().is_ident("bus") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().trim().is_empty() {
                    return Err(meta.error("message type name must not be empty"));
                }
                attrs.name = Some(value);
                Ok(())
            } else if meta.path.is_ident("response") {
                attrs.response = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("unsupported bus attribute, expected `name` or `response`"))
            }
        })?;
    }

    Ok(attrs)
}
