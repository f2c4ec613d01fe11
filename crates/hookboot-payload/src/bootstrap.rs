//! Bootstrap orchestrator.
//!
//! Sequences the whole injection: decode the envelope, reach the host,
//! claim the channel, resolve the user module, validate and construct the
//! entry point, notify the host, run. Every terminal path after the channel
//! claim releases hook state exactly once, before the claim itself is
//! given back; no error unwinds past [`Bootstrap::run`].

use std::panic::{AssertUnwindSafe, catch_unwind};

use hookboot_shared::plugin::RemoteContext;
use hookboot_shared::{RemoteInfo, Result};

use crate::entry;
use crate::params::RawParams;
use crate::registry::ChannelRegistry;
use crate::resolve::{self, EntryModule, ModuleLoader};
use crate::session::{HookEngine, HostConnector, HostLink};

/// Nothing to do, pre-connection failure, or normal completion
pub const OUTCOME_OK: i32 = 0;

/// Channel already handled by an earlier invocation
pub const OUTCOME_DUPLICATE: i32 = 1;

/// Failure after the control channel was established
pub const OUTCOME_FAILED: i32 = -1;

/// One bootstrap invocation's collaborators.
pub struct Bootstrap<'r, C, L, H> {
    connector: C,
    loader: L,
    hooks: H,
    registry: &'r ChannelRegistry,
}

impl<'r, C, L, H> Bootstrap<'r, C, L, H>
where
    C: HostConnector,
    L: ModuleLoader,
    H: HookEngine,
{
    pub fn new(connector: C, loader: L, hooks: H, registry: &'r ChannelRegistry) -> Self {
        Self {
            connector,
            loader,
            hooks,
            registry,
        }
    }

    /// Execute the bootstrap for one set of raw parameters.
    ///
    /// Returns the process outcome code; never panics, never leaks an
    /// error.
    pub fn run(&mut self, raw: RawParams) -> i32 {
        // Stage-1 decode: channel and module locators. Anything wrong here
        // means there is no host to talk to, so log locally and bow out.
        let info = match RemoteInfo::decode(&raw.payload) {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(error = %e, "rejecting injection payload");
                return OUTCOME_OK;
            }
        };

        tracing::debug!(
            channel = %info.channel_name,
            raw_host_pid = raw.host_pid,
            host_pid = info.host_pid,
            "bootstrap parameters decoded"
        );

        let mut link = match self.connector.connect(&info.channel_name) {
            Ok(link) => link,
            Err(e) => {
                tracing::error!(error = %e, channel = %info.channel_name, "cannot reach host");
                return OUTCOME_OK;
            }
        };

        if let Err(e) = link.ping() {
            tracing::error!(error = %e, "host did not confirm liveness");
            return OUTCOME_OK;
        }

        // Re-entrancy guard: the native loader may invoke us again for the
        // same injection. Only the first call proceeds.
        let lease = match self.registry.try_begin(&info.channel_name) {
            Some(lease) => lease,
            None => {
                tracing::debug!(channel = %info.channel_name, "duplicate bootstrap invocation");
                link.comment(&format!(
                    "channel '{}' is already handled in this process",
                    info.channel_name
                ));
                return OUTCOME_DUPLICATE;
            }
        };

        let pid = std::process::id();
        let outcome = match self.execute(&info, &mut link, pid) {
            Ok(()) => OUTCOME_OK,
            Err(err) => {
                tracing::error!(error = %err, "bootstrap failed");
                // Reporting happens inside the cleanup path; a fault in the
                // report itself must not displace the original error.
                let reported = catch_unwind(AssertUnwindSafe(|| {
                    link.error(&err.to_string());
                    link.notify_failed(pid, &err.failure_report());
                }));
                if reported.is_err() {
                    tracing::warn!("failed to forward the failure report to the host");
                }
                OUTCOME_FAILED
            }
        };

        // Hook state goes first, then the channel claim.
        self.hooks.release_all();
        drop(lease);
        outcome
    }

    /// Everything between a confirmed session and a terminal outcome.
    fn execute(&mut self, info: &RemoteInfo, link: &mut C::Link, pid: u32) -> Result<()> {
        let module = resolve::resolve_module(&self.loader, info, link)?;

        // Stage-2 decode: individual arguments, deferred until now so the
        // loaded module defines what they mean.
        let args = entry::decode_arguments(&info.user_args)?;

        let table = module.entry_table()?;
        let entry_point = entry::select_entry(table)?;
        entry::validate_signature(entry_point, &args)?;

        // The envelope's host PID wins over the raw block (the injector may
        // have gone through a helper process).
        let ctx = RemoteContext {
            host_pid: info.host_pid,
        };

        let mut instance = entry::construct(entry_point, &ctx, &args)?;

        link.notify_completed(pid);
        tracing::debug!(entry = entry_point.name, "entering entry point");

        entry::invoke_run(&mut instance, &ctx, &args)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use hookboot_shared::plugin::{
        EntryDescriptor, EntryPoint, EntryTable, PLUGIN_API_VERSION, ParamKind, ParamShape,
        PluginError,
    };
    use hookboot_shared::{Error, FailureReport, PluginValue};

    use super::*;

    thread_local! {
        static EVENTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    fn record(event: impl Into<String>) {
        EVENTS.with(|e| e.borrow_mut().push(event.into()));
    }

    fn take_events() -> Vec<String> {
        EVENTS.with(|e| e.borrow_mut().drain(..).collect())
    }

    struct TestLink {
        ping_ok: bool,
    }

    impl HostLink for TestLink {
        fn ping(&mut self) -> Result<()> {
            record("ping");
            if self.ping_ok {
                Ok(())
            } else {
                Err(Error::HostUnreachable("test host gone".into()))
            }
        }

        fn notify_completed(&mut self, pid: u32) {
            record(format!("completed:{pid}"));
        }

        fn notify_failed(&mut self, _pid: u32, report: &FailureReport) {
            record(format!("failed:{:?}", report.stage));
        }

        fn comment(&mut self, text: &str) {
            record(format!("comment:{text}"));
        }

        fn warn(&mut self, _text: &str) {}

        fn error(&mut self, _text: &str) {}
    }

    struct TestConnector {
        connect_ok: bool,
        ping_ok: bool,
    }

    impl HostConnector for TestConnector {
        type Link = TestLink;

        fn connect(&self, channel: &str) -> Result<TestLink> {
            record(format!("connect:{channel}"));
            if self.connect_ok {
                Ok(TestLink {
                    ping_ok: self.ping_ok,
                })
            } else {
                Err(Error::Connect {
                    channel: channel.to_owned(),
                    reason: "no mapping".into(),
                })
            }
        }
    }

    struct TestModule {
        table: Option<&'static EntryTable>,
    }

    impl EntryModule for TestModule {
        fn entry_table(&self) -> Result<&'static EntryTable> {
            self.table.ok_or(Error::EntryPointNotFound)
        }
    }

    struct TestLoader {
        identity_ok: bool,
        path_ok: bool,
        table: Option<&'static EntryTable>,
    }

    impl ModuleLoader for TestLoader {
        type Module = TestModule;

        fn load_by_identity(&self, _identity: &str) -> Result<TestModule> {
            record("load_identity");
            if self.identity_ok {
                Ok(TestModule { table: self.table })
            } else {
                Err(Error::Other("identity load refused".into()))
            }
        }

        fn load_by_path(&self, _path: &str) -> Result<TestModule> {
            record("load_path");
            if self.path_ok {
                Ok(TestModule { table: self.table })
            } else {
                Err(Error::Other("path load refused".into()))
            }
        }
    }

    struct TestHooks<'a> {
        registry: &'a ChannelRegistry,
        channel: &'static str,
    }

    impl HookEngine for TestHooks<'_> {
        fn release_all(&mut self) {
            // observe whether the channel claim is still held at release time
            let held = self.registry.is_active(self.channel);
            record(format!("release:{}", if held { "held" } else { "gone" }));
        }
    }

    struct RecordingEntry {
        fail_run: bool,
    }

    impl EntryPoint for RecordingEntry {
        fn run(&mut self, _ctx: &RemoteContext, _args: &[PluginValue]) -> std::result::Result<(), PluginError> {
            record("run");
            if self.fail_run {
                Err("late failure".into())
            } else {
                Ok(())
            }
        }
    }

    fn ok_factory(
        ctx: &RemoteContext,
        _args: &[PluginValue],
    ) -> std::result::Result<Box<dyn EntryPoint>, PluginError> {
        record(format!("construct:{}", ctx.host_pid));
        Ok(Box::new(RecordingEntry { fail_run: false }))
    }

    fn run_failing_factory(
        ctx: &RemoteContext,
        _args: &[PluginValue],
    ) -> std::result::Result<Box<dyn EntryPoint>, PluginError> {
        record(format!("construct:{}", ctx.host_pid));
        Ok(Box::new(RecordingEntry { fail_run: true }))
    }

    fn refusing_factory(
        _ctx: &RemoteContext,
        _args: &[PluginValue],
    ) -> std::result::Result<Box<dyn EntryPoint>, PluginError> {
        Err("constructor said no".into())
    }

    const DEMO_PARAMS: &[ParamShape] = &[
        ParamShape::required(ParamKind::I32),
        ParamShape::required(ParamKind::Str),
    ];

    static OK_TABLE: EntryTable = EntryTable {
        api_version: PLUGIN_API_VERSION,
        entries: &[EntryDescriptor {
            name: "ok",
            params: DEMO_PARAMS,
            construct: ok_factory,
        }],
    };

    static RUN_FAILING_TABLE: EntryTable = EntryTable {
        api_version: PLUGIN_API_VERSION,
        entries: &[EntryDescriptor {
            name: "late",
            params: DEMO_PARAMS,
            construct: run_failing_factory,
        }],
    };

    static REFUSING_TABLE: EntryTable = EntryTable {
        api_version: PLUGIN_API_VERSION,
        entries: &[EntryDescriptor {
            name: "refusing",
            params: DEMO_PARAMS,
            construct: refusing_factory,
        }],
    };

    static EMPTY_TABLE: EntryTable = EntryTable {
        api_version: PLUGIN_API_VERSION,
        entries: &[],
    };

    static AMBIGUOUS_TABLE: EntryTable = EntryTable {
        api_version: PLUGIN_API_VERSION,
        entries: &[
            EntryDescriptor {
                name: "first",
                params: DEMO_PARAMS,
                construct: ok_factory,
            },
            EntryDescriptor {
                name: "second",
                params: DEMO_PARAMS,
                construct: ok_factory,
            },
        ],
    };

    fn raw_params(args: Vec<PluginValue>) -> RawParams {
        let info = RemoteInfo {
            channel_name: "ch1".into(),
            host_pid: 1234,
            module_path: "C:\\x\\user.dll".into(),
            module_identity: "user".into(),
            user_args: args.iter().map(PluginValue::encode).collect(),
        };
        RawParams {
            host_pid: 1234,
            payload: info.encode(),
        }
    }

    fn demo_args() -> Vec<PluginValue> {
        vec![PluginValue::I32(5), PluginValue::Str("x".into())]
    }

    fn bootstrap<'r>(
        registry: &'r ChannelRegistry,
        connector: TestConnector,
        loader: TestLoader,
    ) -> Bootstrap<'r, TestConnector, TestLoader, TestHooks<'r>> {
        Bootstrap::new(
            connector,
            loader,
            TestHooks {
                registry,
                channel: "ch1",
            },
            registry,
        )
    }

    fn live_connector() -> TestConnector {
        TestConnector {
            connect_ok: true,
            ping_ok: true,
        }
    }

    fn loader_with(table: &'static EntryTable) -> TestLoader {
        TestLoader {
            identity_ok: true,
            path_ok: true,
            table: Some(table),
        }
    }

    fn release_count(events: &[String]) -> usize {
        events.iter().filter(|e| e.starts_with("release:")).count()
    }

    #[test]
    fn test_malformed_payload_is_inert() {
        let registry = ChannelRegistry::new();
        let raw = RawParams {
            host_pid: 1,
            payload: vec![0xDE, 0xAD],
        };
        let outcome = bootstrap(&registry, live_connector(), loader_with(&OK_TABLE)).run(raw);
        assert_eq!(outcome, OUTCOME_OK);
        // nothing happened: no connection, no claim, no release
        assert!(take_events().is_empty());
        assert!(!registry.is_active("ch1"));
    }

    #[test]
    fn test_connect_failure_is_inert() {
        let registry = ChannelRegistry::new();
        let connector = TestConnector {
            connect_ok: false,
            ping_ok: true,
        };
        let outcome =
            bootstrap(&registry, connector, loader_with(&OK_TABLE)).run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_OK);
        let events = take_events();
        assert_eq!(events, vec!["connect:ch1"]);
        assert!(!registry.is_active("ch1"));
    }

    #[test]
    fn test_ping_failure_is_inert() {
        let registry = ChannelRegistry::new();
        let connector = TestConnector {
            connect_ok: true,
            ping_ok: false,
        };
        let outcome =
            bootstrap(&registry, connector, loader_with(&OK_TABLE)).run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_OK);
        let events = take_events();
        assert_eq!(events, vec!["connect:ch1", "ping"]);
        assert_eq!(release_count(&events), 0);
    }

    #[test]
    fn test_duplicate_channel_short_circuits() {
        let registry = ChannelRegistry::new();
        let first_claim = registry.try_begin("ch1").unwrap();

        let outcome = bootstrap(&registry, live_connector(), loader_with(&OK_TABLE))
            .run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_DUPLICATE);

        let events = take_events();
        // liveness was confirmed, then nothing else: no module, no entry
        // point, no release, and the original claim is untouched
        assert!(events.iter().any(|e| e == "ping"));
        assert!(!events.iter().any(|e| e.starts_with("load_")));
        assert!(!events.iter().any(|e| e.starts_with("construct")));
        assert!(!events.iter().any(|e| e == "run"));
        assert_eq!(release_count(&events), 0);
        assert!(registry.is_active("ch1"));
        drop(first_claim);
    }

    #[test]
    fn test_happy_path_completes_before_run() {
        let registry = ChannelRegistry::new();
        let outcome = bootstrap(&registry, live_connector(), loader_with(&OK_TABLE))
            .run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_OK);

        let events = take_events();
        let completed = format!("completed:{}", std::process::id());
        let pos = |needle: &str| {
            events
                .iter()
                .position(|e| e == needle)
                .unwrap_or_else(|| panic!("missing event {needle}: {events:?}"))
        };

        assert!(pos("construct:1234") < pos(&completed));
        assert!(pos(&completed) < pos("run"));
        assert!(pos("run") < pos("release:held"));
        assert_eq!(release_count(&events), 1);
        assert!(!registry.is_active("ch1"));
    }

    #[test]
    fn test_path_fallback_is_transparent() {
        let registry = ChannelRegistry::new();
        let loader = TestLoader {
            identity_ok: false,
            path_ok: true,
            table: Some(&OK_TABLE),
        };
        let outcome =
            bootstrap(&registry, live_connector(), loader).run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_OK);

        let events = take_events();
        assert!(events.iter().any(|e| e == "load_identity"));
        assert!(events.iter().any(|e| e == "load_path"));
        assert!(events.iter().any(|e| e == "run"));
    }

    #[test]
    fn test_module_load_failure() {
        let registry = ChannelRegistry::new();
        let loader = TestLoader {
            identity_ok: false,
            path_ok: false,
            table: None,
        };
        let outcome =
            bootstrap(&registry, live_connector(), loader).run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_FAILED);

        let events = take_events();
        assert!(events.iter().any(|e| e == "failed:ModuleLoad"));
        assert_eq!(release_count(&events), 1);
        assert!(!registry.is_active("ch1"));
    }

    #[test]
    fn test_entry_point_not_found() {
        let registry = ChannelRegistry::new();
        let loader = TestLoader {
            identity_ok: true,
            path_ok: true,
            table: None,
        };
        let outcome =
            bootstrap(&registry, live_connector(), loader).run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_FAILED);
        let events = take_events();
        assert!(events.iter().any(|e| e == "failed:EntryPoint"));
        assert_eq!(release_count(&events), 1);
    }

    #[test]
    fn test_empty_entry_table() {
        let registry = ChannelRegistry::new();
        let outcome = bootstrap(&registry, live_connector(), loader_with(&EMPTY_TABLE))
            .run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_FAILED);
        assert!(take_events().iter().any(|e| e == "failed:EntryPoint"));
    }

    #[test]
    fn test_ambiguous_entry_table() {
        let registry = ChannelRegistry::new();
        let outcome = bootstrap(&registry, live_connector(), loader_with(&AMBIGUOUS_TABLE))
            .run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_FAILED);
        let events = take_events();
        assert!(events.iter().any(|e| e == "failed:EntryPoint"));
        // neither candidate was constructed
        assert!(!events.iter().any(|e| e.starts_with("construct")));
    }

    #[test]
    fn test_argument_count_mismatch() {
        let registry = ChannelRegistry::new();
        let outcome = bootstrap(&registry, live_connector(), loader_with(&OK_TABLE))
            .run(raw_params(vec![PluginValue::I32(5)]));
        assert_eq!(outcome, OUTCOME_FAILED);

        let events = take_events();
        assert!(events.iter().any(|e| e == "failed:Signature"));
        assert!(!events.iter().any(|e| e.starts_with("construct")));
        assert_eq!(release_count(&events), 1);
    }

    #[test]
    fn test_argument_type_mismatch() {
        let registry = ChannelRegistry::new();
        let outcome = bootstrap(&registry, live_connector(), loader_with(&OK_TABLE))
            .run(raw_params(vec![
                PluginValue::Str("not an i32".into()),
                PluginValue::Str("x".into()),
            ]));
        assert_eq!(outcome, OUTCOME_FAILED);
        assert!(take_events().iter().any(|e| e == "failed:Signature"));
    }

    #[test]
    fn test_undecodable_argument_reported_after_load() {
        let registry = ChannelRegistry::new();
        let mut raw = raw_params(Vec::new());
        let info = RemoteInfo {
            channel_name: "ch1".into(),
            host_pid: 1234,
            module_path: "C:\\x\\user.dll".into(),
            module_identity: "user".into(),
            user_args: vec![vec![0xFF]],
        };
        raw.payload = info.encode();

        let outcome = bootstrap(&registry, live_connector(), loader_with(&OK_TABLE)).run(raw);
        assert_eq!(outcome, OUTCOME_FAILED);

        let events = take_events();
        // the module was loaded before the bad argument surfaced
        assert!(events.iter().any(|e| e == "load_identity"));
        assert!(events.iter().any(|e| e == "failed:ArgumentDecode"));
    }

    #[test]
    fn test_construct_failure() {
        let registry = ChannelRegistry::new();
        let outcome = bootstrap(&registry, live_connector(), loader_with(&REFUSING_TABLE))
            .run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_FAILED);

        let events = take_events();
        assert!(events.iter().any(|e| e == "failed:Construct"));
        assert!(!events.iter().any(|e| e == "run"));
        assert!(!events.iter().any(|e| e.starts_with("completed")));
        assert_eq!(release_count(&events), 1);
        assert!(!registry.is_active("ch1"));
    }

    #[test]
    fn test_run_failure_after_completion() {
        let registry = ChannelRegistry::new();
        let outcome = bootstrap(&registry, live_connector(), loader_with(&RUN_FAILING_TABLE))
            .run(raw_params(demo_args()));
        assert_eq!(outcome, OUTCOME_FAILED);

        let events = take_events();
        let completed = format!("completed:{}", std::process::id());
        // completion was already reported when the run phase failed
        assert!(events.iter().any(|e| e == &completed));
        assert!(events.iter().any(|e| e == "run"));
        assert!(events.iter().any(|e| e == "failed:Run"));
        assert_eq!(release_count(&events), 1);
        assert!(!registry.is_active("ch1"));
    }
}
