//! Startup validation and derived topology.

use courier_rust::{
    async_trait, Bus, BusBuilder, BusConfig, BusError, BusEvent, ComponentRegistry,
    ConfigurationError, HandleCommand, HandlerError, InMemoryTransport,
    MessageContext, MessageHandler, MessageKind,
};
use serde::{Deserialize, Serialize};

use crate::support::{components, handlers, Deposit, Ledger, TestBus};

fn build_err(builder: BusBuilder) -> BusError {
    match builder.build() {
        Ok(_) => panic!("expected the bus to be rejected"),
        Err(err) => err,
    }
}

fn configuration_err(builder: BusBuilder) -> ConfigurationError {
    match build_err(builder) {
        BusError::Configuration(err) => err,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

fn full_registry() -> ComponentRegistry {
    components(&Ledger::default(), &Default::default())
}

struct SecondDepositHandler;

impl MessageHandler for SecondDepositHandler {}

#[async_trait]
impl HandleCommand<Deposit> for SecondDepositHandler {
    async fn handle(&self, _command: &Deposit, _ctx: &MessageContext) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Reuses the deposit command's type name as an event.
#[derive(Debug, Clone, Serialize, Deserialize, BusEvent)]
#[bus(name = "ledger.deposit")]
struct DepositNotice {
    pub account: String,
}

#[test]
fn transport_is_required() {
    let err = configuration_err(Bus::builder().with_resolver(full_registry()));
    assert!(matches!(
        err,
        ConfigurationError::InvalidSetting {
            setting: "transport",
            ..
        }
    ));
}

#[test]
fn resolver_is_required() {
    let err = configuration_err(Bus::builder().with_transport(InMemoryTransport::new()));
    assert!(matches!(
        err,
        ConfigurationError::InvalidSetting {
            setting: "resolver",
            ..
        }
    ));
}

#[test]
fn unresolvable_handler_fails_the_build() {
    let err = configuration_err(
        Bus::builder()
            .with_transport(InMemoryTransport::new())
            .with_resolver(ComponentRegistry::new())
            .with_handlers(handlers()),
    );
    match err {
        ConfigurationError::MissingComponent {
            component,
            required_by,
        } => {
            assert!(component.ends_with("DepositHandler"));
            assert_eq!(required_by, "message type `ledger.deposit`");
        }
        other => panic!("expected MissingComponent, got {other:?}"),
    }
}

#[test]
fn command_with_two_handlers_is_ambiguous() {
    let err = configuration_err(
        Bus::builder()
            .with_transport(InMemoryTransport::new())
            .with_resolver(full_registry().handler(|| SecondDepositHandler))
            .with_handlers(handlers().command::<Deposit, SecondDepositHandler>()),
    );
    match err {
        ConfigurationError::AmbiguousHandler {
            message_type,
            handlers,
        } => {
            assert_eq!(message_type, "ledger.deposit");
            assert_eq!(handlers.len(), 2);
        }
        other => panic!("expected AmbiguousHandler, got {other:?}"),
    }
}

#[test]
fn declared_type_cannot_change_kind() {
    let err = configuration_err(
        Bus::builder()
            .with_transport(InMemoryTransport::new())
            .with_resolver(full_registry())
            .with_handlers(handlers())
            .with_message_type::<DepositNotice>(),
    );
    assert_eq!(
        err,
        ConfigurationError::ConflictingMessageKind {
            message_type: "ledger.deposit".into(),
            first: MessageKind::Command,
            second: MessageKind::Event,
        }
    );
}

#[test]
fn out_of_range_settings_are_rejected() {
    let err = configuration_err(
        Bus::builder()
            .with_transport(InMemoryTransport::new())
            .with_resolver(full_registry())
            .with_max_concurrent_handlers(0),
    );
    assert!(matches!(
        err,
        ConfigurationError::InvalidSetting {
            setting: "max_concurrent_handlers",
            ..
        }
    ));

    let err = configuration_err(
        Bus::builder()
            .with_transport(InMemoryTransport::new())
            .with_resolver(full_registry())
            .with_max_delivery_attempts(0),
    );
    assert!(matches!(
        err,
        ConfigurationError::InvalidSetting {
            setting: "max_delivery_attempts",
            ..
        }
    ));
}

#[test]
fn empty_handler_registry_still_builds() {
    let bus = Bus::builder()
        .with_transport(InMemoryTransport::new())
        .with_resolver(ComponentRegistry::new())
        .build()
        .ok()
        .expect("a bus with no handlers is valid");

    assert!(bus.message_types().is_empty());
    assert_eq!(bus.sources().len(), 1);
}

#[test]
fn sources_follow_the_naming_convention() {
    let t = TestBus::build(|b| b);

    let paths: Vec<String> = t.bus.sources().iter().map(|s| s.path()).collect();
    assert_eq!(
        paths,
        vec![
            "q.ledger.deposit",
            "q.ledger.get_balance",
            "q.ledger.work",
            "t.ledger.deposited/subscriptions/ledger",
            "r.ledger.node-1",
        ]
    );
    assert_eq!(t.bus.reply_queue(), "r.ledger.node-1");

    let kinds = t.bus.message_types();
    assert_eq!(kinds.get("ledger.deposit"), Some(&MessageKind::Command));
    assert_eq!(kinds.get("ledger.deposited"), Some(&MessageKind::Event));
    assert_eq!(kinds.get("ledger.get_balance"), Some(&MessageKind::Request));
}

#[test]
fn config_values_flow_into_the_bus() {
    let config = BusConfig {
        application_name: "Billing Service".into(),
        instance_name: "pod-7".into(),
        max_concurrent_handlers: 3,
        ..BusConfig::default()
    };
    let bus = Bus::builder()
        .with_config(config)
        .with_transport(InMemoryTransport::new())
        .with_resolver(full_registry())
        .with_handlers(handlers())
        .build()
        .ok()
        .expect("valid config");

    assert_eq!(bus.config().max_concurrent_handlers, 3);
    assert_eq!(bus.reply_queue(), "r.billing.service.pod-7");
    assert!(bus
        .sources()
        .iter()
        .any(|s| s.path() == "t.ledger.deposited/subscriptions/billing.service"));
}
