//! Integration test: dispatch chassis
//!
//! Drives `ValidationChain::run` with recording units that log every phase
//! they see, covering phase order, vetoes, the teardown exemption, setup
//! failures, self-aborts and re-entrant calls from inside the dispatch.

use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use vkguard_core::config::{LockingMode, MessageSettings};
use vkguard_core::{ErrorObject, MemorySink, RecordObject, Reporter};
use vkguard_gpuav::SetupError;
use vkguard_layer::call::{Call, CallScratch};
use vkguard_layer::chassis::{Command, Phases, UnitKind, ValidationChain, ValidationObject, SKIPPED_RESULT};

type Log = Arc<Mutex<Vec<String>>>;

struct TraceUnit {
    kind: UnitKind,
    log: Log,
    skip: bool,
    fail_setup: bool,
    abort_after_record: bool,
    aborted: bool,
    teardowns: Arc<Mutex<u32>>,
}

impl TraceUnit {
    fn push(&self, event: &str) {
        self.log.lock().push(format!("{}:{}", self.kind, event));
    }
}

impl ValidationObject for TraceUnit {
    fn kind(&self) -> UnitKind {
        self.kind
    }

    fn intercepts(&self, command: Command) -> Phases {
        match command {
            Command::CmdDraw | Command::DestroyInstance | Command::DestroyDevice | Command::QueueWaitIdle => {
                Phases::all()
            }
            _ => Phases::empty(),
        }
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        if self.fail_setup {
            Err(SetupError::BindingSlotsExhausted { limit: 1 })
        } else {
            Ok(())
        }
    }

    fn pre_call_validate(&self, _call: &Call, _error: &ErrorObject) -> bool {
        self.push("validate");
        self.skip
    }

    fn pre_call_record(&mut self, call: &mut Call, _record: &RecordObject, _scratch: &mut CallScratch) {
        self.push("before");
        if let Call::CmdDraw { vertex_count, .. } = call {
            *vertex_count += 1;
        }
    }

    fn post_call_record(&mut self, _call: &mut Call, record: &RecordObject, _scratch: &mut CallScratch) {
        self.push(&format!("after({:?})", record.result));
        if self.abort_after_record {
            self.aborted = true;
        }
    }

    fn aborted(&self) -> bool {
        self.aborted
    }

    fn teardown(&mut self) {
        *self.teardowns.lock() += 1;
    }
}

fn make_unit(kind: UnitKind, log: &Log) -> TraceUnit {
    TraceUnit {
        kind,
        log: log.clone(),
        skip: false,
        fail_setup: false,
        abort_after_record: false,
        aborted: false,
        teardowns: Arc::new(Mutex::new(0)),
    }
}

fn make_chain(units: Vec<TraceUnit>, locking: LockingMode) -> (ValidationChain, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let reporter = Arc::new(Reporter::new(sink.clone(), &MessageSettings::default()));
    let units = units
        .into_iter()
        .map(|u| Box::new(u) as Box<dyn ValidationObject>)
        .collect();
    (ValidationChain::new(units, locking, reporter), sink)
}

fn make_draw() -> Call {
    Call::CmdDraw {
        command_buffer: vk::CommandBuffer::from_raw(0x10),
        vertex_count: 3,
        instance_count: 1,
    }
}

fn events(log: &Log) -> Vec<String> {
    log.lock().clone()
}

#[test]
fn test_phases_run_in_order_around_one_dispatch() {
    let log: Log = Arc::default();
    let (chain, _) = make_chain(
        vec![
            make_unit(UnitKind::ThreadSafety, &log),
            make_unit(UnitKind::CoreChecks, &log),
        ],
        LockingMode::Fine,
    );

    let mut call = make_draw();
    let mut dispatched = 0;
    let result = chain.run(Command::CmdDraw, 0x10, &mut call, |call| {
        dispatched += 1;
        log.lock().push("dispatch".into());
        match call {
            // Both units bumped the count in record-before.
            Call::CmdDraw { vertex_count, .. } => assert_eq!(*vertex_count, 5),
            other => panic!("unexpected call {other:?}"),
        }
        vk::Result::SUCCESS
    });

    assert_eq!(result, vk::Result::SUCCESS);
    assert_eq!(dispatched, 1);
    let seen = events(&log);
    println!("events: {seen:?}");
    assert_eq!(
        seen,
        vec![
            "thread-safety:validate",
            "core-checks:validate",
            "thread-safety:before",
            "core-checks:before",
            "dispatch",
            "thread-safety:after(SUCCESS)",
            "core-checks:after(SUCCESS)",
        ]
    );
}

#[test]
fn test_skip_prevents_dispatch() {
    let log: Log = Arc::default();
    let mut vetoing = make_unit(UnitKind::CoreChecks, &log);
    vetoing.skip = true;
    let (chain, _) = make_chain(
        vec![make_unit(UnitKind::ThreadSafety, &log), vetoing],
        LockingMode::Fine,
    );

    let mut call = make_draw();
    let result = chain.run(Command::CmdDraw, 0x10, &mut call, |_| panic!("vetoed call reached the driver"));

    assert_eq!(result, SKIPPED_RESULT);
    // Every validator still runs; nothing is recorded.
    assert_eq!(events(&log), vec!["thread-safety:validate", "core-checks:validate"]);
}

#[test]
fn test_skip_ignored_for_device_destruction() {
    let log: Log = Arc::default();
    let mut vetoing = make_unit(UnitKind::ObjectLifetime, &log);
    vetoing.skip = true;
    let (chain, _) = make_chain(vec![vetoing], LockingMode::Fine);

    let mut call = Call::DestroyDevice {
        device: vk::Device::from_raw(0x2),
    };
    let mut forwarded = false;
    let result = chain.run(Command::DestroyDevice, 0x2, &mut call, |_| {
        forwarded = true;
        vk::Result::SUCCESS
    });

    assert!(forwarded, "device destruction must always reach the driver");
    assert_eq!(result, vk::Result::SUCCESS);
    assert!(events(&log).contains(&"object-lifetime:after(SUCCESS)".to_string()));
}

#[test]
fn test_skip_ignored_for_instance_destruction() {
    let log: Log = Arc::default();
    let mut vetoing = make_unit(UnitKind::ObjectLifetime, &log);
    vetoing.skip = true;
    let (chain, _) = make_chain(vec![vetoing], LockingMode::Fine);

    let mut call = Call::DestroyInstance {
        instance: vk::Instance::from_raw(0x1),
        live_devices: Vec::new(),
    };
    let mut forwarded = false;
    let result = chain.run(Command::DestroyInstance, 0x1, &mut call, |_| {
        forwarded = true;
        vk::Result::SUCCESS
    });

    println!("events: {:?}", events(&log));
    assert!(forwarded, "instance destruction must always reach the driver");
    assert_eq!(result, vk::Result::SUCCESS);
    assert_eq!(
        events(&log),
        vec![
            "object-lifetime:validate",
            "object-lifetime:before",
            "object-lifetime:after(SUCCESS)"
        ]
    );
}

#[test]
fn test_record_after_sees_driver_result() {
    let log: Log = Arc::default();
    let (chain, _) = make_chain(vec![make_unit(UnitKind::StateTracker, &log)], LockingMode::Fine);

    let mut call = Call::QueueWaitIdle {
        queue: vk::Queue::from_raw(0x20),
    };
    let result = chain.run(Command::QueueWaitIdle, 0x20, &mut call, |_| vk::Result::ERROR_DEVICE_LOST);

    assert_eq!(result, vk::Result::ERROR_DEVICE_LOST);
    assert_eq!(
        events(&log).last().map(String::as_str),
        Some("state-tracker:after(ERROR_DEVICE_LOST)")
    );
}

#[test]
fn test_intercept_vectors_only_list_overriding_units() {
    let log: Log = Arc::default();
    let (chain, _) = make_chain(
        vec![
            make_unit(UnitKind::ThreadSafety, &log),
            make_unit(UnitKind::CoreChecks, &log),
        ],
        LockingMode::Fine,
    );

    assert_eq!(chain.intercept_count(Command::CmdDraw, Phases::VALIDATE), 2);
    assert_eq!(chain.intercept_count(Command::CmdDraw, Phases::all()), 6);
    assert_eq!(chain.intercept_count(Command::CreateBuffer, Phases::all()), 0);

    // Commands nobody intercepts still dispatch exactly once.
    let mut call = Call::DestroyBuffer {
        buffer: vk::Buffer::from_raw(0x30),
    };
    let mut dispatched = 0;
    chain.run(Command::DestroyBuffer, 0x2, &mut call, |_| {
        dispatched += 1;
        vk::Result::SUCCESS
    });
    assert_eq!(dispatched, 1);
    assert!(events(&log).is_empty());
}

#[test]
fn test_setup_failure_aborts_only_that_unit() {
    let log: Log = Arc::default();
    let mut failing = make_unit(UnitKind::GpuAssisted, &log);
    failing.fail_setup = true;
    let teardowns = failing.teardowns.clone();
    let (chain, sink) = make_chain(
        vec![make_unit(UnitKind::CoreChecks, &log), failing],
        LockingMode::Fine,
    );

    chain.setup("vkCreateDevice");

    assert_eq!(chain.aborted_kinds(), vec![UnitKind::GpuAssisted]);
    assert_eq!(chain.active_kinds(), vec![UnitKind::CoreChecks]);
    assert!(!chain.is_active(UnitKind::GpuAssisted));
    assert!(sink.has("VKGUARD-unit-setup-failed"));

    let mut call = make_draw();
    chain.run(Command::CmdDraw, 0x10, &mut call, |_| vk::Result::SUCCESS);
    assert!(
        events(&log).iter().all(|e| !e.starts_with("gpu-assisted")),
        "aborted unit was called: {:?}",
        events(&log)
    );

    // Aborted units still release their resources, once.
    chain.teardown();
    chain.teardown();
    assert_eq!(*teardowns.lock(), 1);
}

#[test]
fn test_unit_can_abort_itself_during_record() {
    let log: Log = Arc::default();
    let mut fragile = make_unit(UnitKind::GpuAssisted, &log);
    fragile.abort_after_record = true;
    let (chain, _) = make_chain(
        vec![fragile, make_unit(UnitKind::SyncHazard, &log)],
        LockingMode::Fine,
    );

    let mut call = make_draw();
    chain.run(Command::CmdDraw, 0x10, &mut call, |_| vk::Result::SUCCESS);
    assert_eq!(chain.aborted_kinds(), vec![UnitKind::GpuAssisted]);

    log.lock().clear();
    let mut call = make_draw();
    chain.run(Command::CmdDraw, 0x10, &mut call, |_| vk::Result::SUCCESS);
    let seen = events(&log);
    assert!(seen.iter().all(|e| e.starts_with("sync-hazard")), "{seen:?}");
    assert_eq!(seen.len(), 3);
}

#[test]
fn test_shutdown_turns_chain_into_pass_through() {
    let log: Log = Arc::default();
    let unit = make_unit(UnitKind::ObjectLifetime, &log);
    let teardowns = unit.teardowns.clone();
    let (chain, _) = make_chain(vec![unit], LockingMode::Fine);

    chain.shutdown();
    assert!(chain.active_kinds().is_empty());
    assert_eq!(*teardowns.lock(), 1);

    let mut call = make_draw();
    let result = chain.run(Command::CmdDraw, 0x10, &mut call, |_| vk::Result::SUCCESS);
    assert_eq!(result, vk::Result::SUCCESS);
    assert!(events(&log).is_empty());
}

fn nested_dispatch_completes(locking: LockingMode) {
    let log: Log = Arc::default();
    let (chain, _) = make_chain(vec![make_unit(UnitKind::StateTracker, &log)], locking);

    let mut outer = make_draw();
    let result = chain.run(Command::CmdDraw, 0x10, &mut outer, |_| {
        // A driver calling back into the layer re-enters the same chain.
        let mut inner = Call::QueueWaitIdle {
            queue: vk::Queue::from_raw(0x20),
        };
        chain.run(Command::QueueWaitIdle, 0x20, &mut inner, |_| vk::Result::SUCCESS)
    });

    assert_eq!(result, vk::Result::SUCCESS);
    let seen = events(&log);
    assert_eq!(seen.len(), 6, "{seen:?}");
    assert_eq!(seen[0], "state-tracker:validate");
    assert_eq!(seen[5], "state-tracker:after(SUCCESS)");
}

#[test]
fn test_nested_dispatch_fine_locking() {
    nested_dispatch_completes(LockingMode::Fine);
}

#[test]
fn test_nested_dispatch_coarse_locking() {
    nested_dispatch_completes(LockingMode::Coarse);
}

#[test]
fn test_concurrent_calls_share_a_chain() {
    let log: Log = Arc::default();
    let (chain, _) = make_chain(vec![make_unit(UnitKind::StateTracker, &log)], LockingMode::Coarse);
    let chain = Arc::new(chain);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let chain = chain.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    let mut call = Call::CmdDraw {
                        command_buffer: vk::CommandBuffer::from_raw(0x100 + i),
                        vertex_count: 3,
                        instance_count: 1,
                    };
                    chain.run(Command::CmdDraw, 0x100 + i, &mut call, |_| vk::Result::SUCCESS);
                }
            })
        })
        .collect();
    for handle in handles {
        if handle.join().is_err() {
            panic!("worker thread panicked");
        }
    }

    assert_eq!(events(&log).len(), 4 * 25 * 3);
}
