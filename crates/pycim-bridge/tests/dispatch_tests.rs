//! Dispatch engine integration tests
//!
//! Requests go through `ProviderManager::process_message` end to end against
//! the scripted runtime.

mod common;

use common::*;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pycim_bridge::{
    HandlerFamily, HandlerFamilyKind, HandlerSet, PassthroughHandlers, ProviderCall,
    ProviderManager, Route, route,
};
use pycim_kernel::{
    BridgeConfig, CimException, CimRequest, CimResponse, CimStatusCode, FaultValue, RequestKind,
    RuntimeFault, SubscriptionId,
};

const AN_HOUR: Duration = Duration::from_secs(3600);

fn setup(name: &str) -> (tempfile::TempDir, Script, ProviderManager<ScriptedInterpreter>) {
    let dir = tempfile::tempdir().unwrap();
    provider_file(dir.path(), &format!("{}.py", name), AN_HOUR);
    let script = Script::new();
    let manager = manager(&script, dir.path());
    (dir, script, manager)
}

#[test]
fn test_every_kind_gets_exactly_its_route() {
    let (_dir, script, manager) = setup("all");

    for kind in RequestKind::ALL {
        let response = manager.process_message(&request(kind.clone(), "all"));
        assert_eq!(response.kind, kind);
        assert_eq!(response.message_id, format!("msg-{}", kind));

        match route(&kind) {
            Route::Family(..) => {
                assert!(response.is_success(), "{} failed: {:?}", kind, response.exception);
                let expected = PassthroughHandlers::function_name(&kind).unwrap();
                assert_eq!(response.payload["function"], expected);
            }
            Route::NotYetImplemented(message) => {
                let exc = response.exception.expect("not-yet-implemented exception");
                assert_eq!(exc.code, CimStatusCode::NOT_SUPPORTED);
                assert_eq!(exc.message, message);
            }
            Route::Unsupported => {
                let exc = response.exception.expect("unsupported exception");
                assert_eq!(exc.code, CimStatusCode::NOT_SUPPORTED);
                assert!(exc.message.is_empty());
            }
        }
    }

    // one provider call per family-routed kind
    assert_eq!(script.calls().len(), 16);
    assert_eq!(script.constructions(), 1);
}

#[test]
fn test_pending_operations_have_fixed_messages() {
    let (_dir, _script, manager) = setup("pending");
    let cases = [
        (RequestKind::ExecQuery, "ExecQuery not yet implemented"),
        (
            RequestKind::ModifySubscription,
            "ModifySubscription not yet implemented",
        ),
        (
            RequestKind::DisableModule,
            "DisableModuleRequest not yet implemented",
        ),
        (
            RequestKind::EnableModule,
            "EnableModuleRequest not yet implemented",
        ),
        (
            RequestKind::StopAllProviders,
            "StopAllProviders not yet implemented",
        ),
        (
            RequestKind::SubscriptionInitComplete,
            "SubscriptionInitComplete not yet implemented",
        ),
    ];

    for (kind, message) in cases {
        let exc = manager
            .process_message(&request(kind, "pending"))
            .exception
            .unwrap();
        assert_eq!(exc.code, CimStatusCode::NOT_SUPPORTED);
        assert_eq!(exc.message, message);
    }
}

#[test]
fn test_unrecognized_kind_gets_empty_not_supported() {
    let (_dir, script, manager) = setup("any");
    let kind = RequestKind::from("CIMFrobnicateRequest".to_string());

    let response = manager.process_message(&request(kind.clone(), "any"));
    assert_eq!(response.kind, kind);
    let exc = response.exception.unwrap();
    assert_eq!(exc.code, CimStatusCode::NOT_SUPPORTED);
    assert_eq!(exc.message, "");
    assert!(script.calls().is_empty());
}

#[test]
fn test_subscription_lifecycle_tracks_activation() {
    let (_dir, script, manager) = setup("indications");
    let subscription = SubscriptionId {
        namespace: "root/cimv2".into(),
        filter_name: "F1".into(),
        handler_name: "H1".into(),
    };
    let subscribe = |kind: RequestKind| {
        let mut req = request(kind, "indications");
        req.context = req.context.with_subscription(subscription.clone());
        req
    };

    assert!(!manager.has_active_providers());

    let created = manager.process_message(&subscribe(RequestKind::CreateSubscription));
    assert!(created.is_success());
    assert!(manager.has_active_providers());
    let env = script.last_environment().unwrap();
    assert_eq!(env.subscription.unwrap().filter_name, "F1");

    let deleted = manager.process_message(&subscribe(RequestKind::DeleteSubscription));
    assert!(deleted.is_success());
    assert!(!manager.has_active_providers());

    assert_eq!(script.calls(), vec!["activateFilter", "deActivateFilter"]);
}

#[test]
fn test_unbalanced_delete_subscription_stays_at_zero() {
    let (_dir, _script, manager) = setup("indications");
    let response =
        manager.process_message(&request(RequestKind::DeleteSubscription, "indications"));
    assert!(response.is_success());
    assert!(!manager.has_active_providers());
    assert_eq!(manager.cache_stats().active_entries, 0);
}

#[test]
fn test_provider_error_maps_to_its_code() {
    let (_dir, script, manager) = setup("errors");
    script.fail_call(
        "getInstance",
        cim_error(vec![FaultValue::Int(404), FaultValue::Str("not found".into())]),
    );

    let exc = manager
        .process_message(&request(RequestKind::GetInstance, "errors"))
        .exception
        .unwrap();
    assert_eq!(exc.code, CimStatusCode(404));
    assert_eq!(exc.message, "not found");
    assert!(exc.file.is_some());
    assert!(exc.line.is_some());
}

#[test]
fn test_provider_error_without_code_is_failed() {
    let (_dir, script, manager) = setup("errors");
    script.fail_call(
        "enumInstances",
        cim_error(vec![FaultValue::Str("out of widgets".into())]),
    );

    let exc = manager
        .process_message(&request(RequestKind::EnumerateInstances, "errors"))
        .exception
        .unwrap();
    assert_eq!(exc.code, CimStatusCode::FAILED);
    assert_eq!(exc.message, "out of widgets");
}

#[test]
fn test_other_provider_failure_carries_trace() {
    let (_dir, script, manager) = setup("errors");
    script.fail_call(
        "invokeMethod",
        RuntimeFault::new("builtins.KeyError")
            .with_args(vec![FaultValue::Str("Name".into())])
            .with_trace("Traceback (most recent call last):\n  File \"errors.py\", line 42"),
    );

    let exc = manager
        .process_message(&request(RequestKind::InvokeMethod, "errors"))
        .exception
        .unwrap();
    assert_eq!(exc.code, CimStatusCode::FAILED);
    assert!(exc.message.contains("line 42"));
    assert!(exc.message.contains("KeyError"));
}

#[test]
fn test_runtime_panic_becomes_failed_response() {
    let (_dir, script, manager) = setup("crashy");
    script.panic_on("references");

    let response = manager.process_message(&request(RequestKind::References, "crashy"));
    let exc = response.exception.unwrap();
    assert_eq!(exc.code, CimStatusCode::FAILED);
    assert!(exc.message.contains("provider runtime crashed"));

    // the gate is still usable
    let next = manager.process_message(&request(RequestKind::ReferenceNames, "crashy"));
    assert!(next.is_success());
}

#[test]
fn test_missing_provider_is_not_found_and_runs_no_handler() {
    let (_dir, script, manager) = setup("present");
    let missing = manager.config().provider_dir.join("absent.py");
    script.fail_construct(
        &missing,
        RuntimeFault::new("builtins.FileNotFoundError")
            .with_args(vec![FaultValue::Str("absent.py".into())]),
    );

    let exc = manager
        .process_message(&request(RequestKind::GetInstance, "absent"))
        .exception
        .unwrap();
    assert_eq!(exc.code, CimStatusCode::NOT_FOUND);
    assert!(exc.message.contains("load error"));
    assert!(script.calls().is_empty());
}

#[test]
fn test_empty_location_is_not_found() {
    let (_dir, script, manager) = setup("present");
    let exc = manager
        .process_message(&request(RequestKind::GetInstance, ""))
        .exception
        .unwrap();
    assert_eq!(exc.code, CimStatusCode::NOT_FOUND);
    assert_eq!(script.constructions(), 0);
}

#[test]
fn test_request_environment_reaches_the_provider() {
    let (_dir, script, manager) = setup("env");
    let mut req = request(RequestKind::CreateInstance, "env").with_payload(json!({"Name": "x"}));
    req.context = req
        .context
        .with_user("alice")
        .with_content_language("en-US");

    let response = manager.process_message(&req);
    assert_eq!(response.payload["payload"]["Name"], "x");
    let env = script.last_environment().unwrap();
    assert_eq!(env.user_name.as_deref(), Some("alice"));
    assert_eq!(env.content_language.as_deref(), Some("en-US"));
    assert_eq!(env.module_name, "TestModule");
}

type Seen = Arc<Mutex<Vec<(HandlerFamilyKind, RequestKind)>>>;

struct Recording {
    family: HandlerFamilyKind,
    seen: Seen,
}

impl HandlerFamily<ScriptedInterpreter> for Recording {
    fn handle(
        &self,
        request: &CimRequest,
        _call: &ProviderCall<'_, ScriptedInterpreter>,
    ) -> CimResponse {
        self.seen.lock().push((self.family, request.kind.clone()));
        request
            .build_response()
            .with_payload(json!({ "family": self.family.to_string() }))
    }
}

#[test]
fn test_each_kind_reaches_its_named_family() {
    use HandlerFamilyKind::*;

    let dir = tempfile::tempdir().unwrap();
    provider_file(dir.path(), "families.py", AN_HOUR);
    let script = Script::new();
    let seen = Seen::default();
    let handlers = [Instance, Method, Associator, Indication, IndicationConsumer]
        .into_iter()
        .fold(HandlerSet::passthrough(), |set, family| {
            set.with_family(
                family,
                Recording {
                    family,
                    seen: Arc::clone(&seen),
                },
            )
        });
    let manager = ProviderManager::new(
        BridgeConfig::default().with_provider_dir(dir.path()),
        script.interpreter(),
        handlers,
    )
    .unwrap();

    for kind in RequestKind::ALL {
        manager.process_message(&request(kind, "families"));
    }

    let expected: HashMap<RequestKind, HandlerFamilyKind> = [
        (RequestKind::GetInstance, Instance),
        (RequestKind::EnumerateInstances, Instance),
        (RequestKind::EnumerateInstanceNames, Instance),
        (RequestKind::CreateInstance, Instance),
        (RequestKind::ModifyInstance, Instance),
        (RequestKind::DeleteInstance, Instance),
        (RequestKind::GetProperty, Instance),
        (RequestKind::SetProperty, Instance),
        (RequestKind::InvokeMethod, Method),
        (RequestKind::Associators, Associator),
        (RequestKind::AssociatorNames, Associator),
        (RequestKind::References, Associator),
        (RequestKind::ReferenceNames, Associator),
        (RequestKind::CreateSubscription, Indication),
        (RequestKind::DeleteSubscription, Indication),
        (RequestKind::ExportIndication, IndicationConsumer),
    ]
    .into_iter()
    .collect();

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), expected.len());
    for (family, kind) in &seen {
        assert_eq!(expected.get(kind), Some(family), "{} went to {}", kind, family);
    }
    for (kind, family) in &expected {
        let hits = seen.iter().filter(|(f, k)| k == kind && f == family).count();
        assert_eq!(hits, 1, "{} reached {} {} times", kind, family, hits);
    }

    // recording families never call into the provider
    assert!(script.calls().is_empty());
}

struct CountingMethods;

impl HandlerFamily<ScriptedInterpreter> for CountingMethods {
    fn handle(
        &self,
        request: &CimRequest,
        call: &ProviderCall<'_, ScriptedInterpreter>,
    ) -> CimResponse {
        let serial = call
            .call(|_, provider, _| Ok(provider.serial))
            .unwrap_or_default();
        if serial == 0 {
            return request
                .build_response()
                .with_exception(CimException::failed("no provider"));
        }
        request.build_response().with_payload(json!({ "custom": serial }))
    }
}

#[test]
fn test_custom_handler_family() {
    let dir = tempfile::tempdir().unwrap();
    provider_file(dir.path(), "custom.py", AN_HOUR);
    let script = Script::new();
    let handlers =
        HandlerSet::passthrough().with_family(HandlerFamilyKind::Method, CountingMethods);
    let manager = ProviderManager::new(
        BridgeConfig::default().with_provider_dir(dir.path()),
        script.interpreter(),
        handlers,
    )
    .unwrap();

    let response = manager.process_message(&request(RequestKind::InvokeMethod, "custom"));
    assert_eq!(response.payload["custom"], 1);
    assert!(script.calls().is_empty());
}

#[test]
fn test_shutdown_unloads_providers_and_closes_the_gate() {
    let (_dir, script, manager) = setup("closing");
    manager.process_message(&request(RequestKind::GetInstance, "closing"));

    manager.shutdown();
    assert_eq!(script.shutdown_serials(), vec![1]);
    assert!(script.finalized());
    assert!(manager.cache().is_empty());

    let exc = manager
        .process_message(&request(RequestKind::GetInstance, "closing"))
        .exception
        .unwrap();
    assert_eq!(exc.code, CimStatusCode::NOT_FOUND);

    // idempotent
    manager.shutdown();
    assert_eq!(script.shutdown_serials(), vec![1]);
}

#[test]
fn test_shutdown_failures_are_swallowed() {
    let (_dir, script, manager) = setup("stubborn");
    script.fail_call("shutdown", cim_error(vec![FaultValue::Int(1)]));
    manager.process_message(&request(RequestKind::GetInstance, "stubborn"));

    drop(manager);
    assert_eq!(script.shutdown_serials(), vec![1]);
    assert!(script.finalized());
}
