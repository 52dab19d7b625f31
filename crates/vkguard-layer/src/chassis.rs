//! The per-call dispatch protocol.
//!
//! Every intercepted entry point snapshots its arguments into a [`Call`]
//! and hands it to [`ValidationChain::run`], which drives four phases:
//! validate (read-locked, may veto the call), record-before (write-locked,
//! may edit the call-local copy), exactly one dispatch to the next layer
//! with no unit lock held, and record-after (write-locked, sees the real
//! result code).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;
use bitflags::bitflags;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace, warn};
use vkguard_core::config::LockingMode;
use vkguard_core::{ErrorObject, Location, RecordObject, Reporter};
use vkguard_gpuav::SetupError;

use crate::call::{Call, CallScratch};

macro_rules! commands {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Every entry point that runs through a validation chain.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Command {
            $($variant),*
        }

        impl Command {
            pub const ALL: &'static [Command] = &[$(Command::$variant),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Command::$variant => $name),*
                }
            }
        }
    };
}

commands! {
    // ── Instance ────────────────────────────────────────────
    CreateInstance => "vkCreateInstance",
    DestroyInstance => "vkDestroyInstance",
    EnumeratePhysicalDevices => "vkEnumeratePhysicalDevices",
    GetPhysicalDeviceProperties => "vkGetPhysicalDeviceProperties",
    GetPhysicalDeviceProperties2 => "vkGetPhysicalDeviceProperties2",
    CreateDevice => "vkCreateDevice",
    DestroySurfaceKHR => "vkDestroySurfaceKHR",
    // ── Device and queues ───────────────────────────────────
    DestroyDevice => "vkDestroyDevice",
    GetDeviceQueue => "vkGetDeviceQueue",
    QueueSubmit => "vkQueueSubmit",
    QueueWaitIdle => "vkQueueWaitIdle",
    DeviceWaitIdle => "vkDeviceWaitIdle",
    // ── Memory ──────────────────────────────────────────────
    AllocateMemory => "vkAllocateMemory",
    FreeMemory => "vkFreeMemory",
    MapMemory => "vkMapMemory",
    UnmapMemory => "vkUnmapMemory",
    BindBufferMemory => "vkBindBufferMemory",
    BindImageMemory => "vkBindImageMemory",
    BindImageMemory2 => "vkBindImageMemory2",
    // ── Buffers and images ──────────────────────────────────
    CreateBuffer => "vkCreateBuffer",
    DestroyBuffer => "vkDestroyBuffer",
    CreateImage => "vkCreateImage",
    DestroyImage => "vkDestroyImage",
    CreateImageView => "vkCreateImageView",
    DestroyImageView => "vkDestroyImageView",
    // ── Swapchain ───────────────────────────────────────────
    CreateSwapchainKHR => "vkCreateSwapchainKHR",
    DestroySwapchainKHR => "vkDestroySwapchainKHR",
    GetSwapchainImagesKHR => "vkGetSwapchainImagesKHR",
    AcquireNextImageKHR => "vkAcquireNextImageKHR",
    QueuePresentKHR => "vkQueuePresentKHR",
    // ── Shaders and pipelines ───────────────────────────────
    CreateShaderModule => "vkCreateShaderModule",
    DestroyShaderModule => "vkDestroyShaderModule",
    CreateDescriptorSetLayout => "vkCreateDescriptorSetLayout",
    DestroyDescriptorSetLayout => "vkDestroyDescriptorSetLayout",
    CreatePipelineLayout => "vkCreatePipelineLayout",
    DestroyPipelineLayout => "vkDestroyPipelineLayout",
    CreateGraphicsPipelines => "vkCreateGraphicsPipelines",
    CreateComputePipelines => "vkCreateComputePipelines",
    DestroyPipeline => "vkDestroyPipeline",
    CreateShadersEXT => "vkCreateShadersEXT",
    DestroyShaderEXT => "vkDestroyShaderEXT",
    // ── Descriptors ─────────────────────────────────────────
    CreateDescriptorPool => "vkCreateDescriptorPool",
    DestroyDescriptorPool => "vkDestroyDescriptorPool",
    ResetDescriptorPool => "vkResetDescriptorPool",
    AllocateDescriptorSets => "vkAllocateDescriptorSets",
    FreeDescriptorSets => "vkFreeDescriptorSets",
    // ── Command pools and buffers ───────────────────────────
    CreateCommandPool => "vkCreateCommandPool",
    DestroyCommandPool => "vkDestroyCommandPool",
    ResetCommandPool => "vkResetCommandPool",
    AllocateCommandBuffers => "vkAllocateCommandBuffers",
    FreeCommandBuffers => "vkFreeCommandBuffers",
    BeginCommandBuffer => "vkBeginCommandBuffer",
    EndCommandBuffer => "vkEndCommandBuffer",
    ResetCommandBuffer => "vkResetCommandBuffer",
    // ── Recorded commands ───────────────────────────────────
    CmdBindPipeline => "vkCmdBindPipeline",
    CmdBindDescriptorSets => "vkCmdBindDescriptorSets",
    CmdBindShadersEXT => "vkCmdBindShadersEXT",
    CmdDraw => "vkCmdDraw",
    CmdDispatch => "vkCmdDispatch",
    CmdCopyBuffer => "vkCmdCopyBuffer",
    CmdFillBuffer => "vkCmdFillBuffer",
    CmdPipelineBarrier => "vkCmdPipelineBarrier",
}

impl Command {
    pub const COUNT: usize = Self::ALL.len();

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Calls forwarded even when a unit asked to skip them.
pub const SKIP_IGNORED: &[Command] = &[Command::DestroyInstance, Command::DestroyDevice];

/// Result returned to the application for a vetoed call.
pub const SKIPPED_RESULT: vk::Result = vk::Result::ERROR_VALIDATION_FAILED_EXT;

bitflags! {
    /// The unit-visible phases of a call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Phases: u8 {
        const VALIDATE = 0b001;
        const RECORD_BEFORE = 0b010;
        const RECORD_AFTER = 0b100;
        const RECORD = Self::RECORD_BEFORE.bits() | Self::RECORD_AFTER.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Validate = 0,
    RecordBefore = 1,
    RecordAfter = 2,
}

impl Phase {
    const ALL: [Phase; 3] = [Phase::Validate, Phase::RecordBefore, Phase::RecordAfter];

    fn flag(self) -> Phases {
        match self {
            Phase::Validate => Phases::VALIDATE,
            Phase::RecordBefore => Phases::RECORD_BEFORE,
            Phase::RecordAfter => Phases::RECORD_AFTER,
        }
    }
}

/// Concrete unit types, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitKind {
    ThreadSafety,
    ObjectLifetime,
    Stateless,
    StateTracker,
    CoreChecks,
    BestPractices,
    GpuAssisted,
    SyncHazard,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitKind::ThreadSafety => "thread-safety",
            UnitKind::ObjectLifetime => "object-lifetime",
            UnitKind::Stateless => "stateless",
            UnitKind::StateTracker => "state-tracker",
            UnitKind::CoreChecks => "core-checks",
            UnitKind::BestPractices => "best-practices",
            UnitKind::GpuAssisted => "gpu-assisted",
            UnitKind::SyncHazard => "sync-hazard",
        })
    }
}

/// One independent checker attached to an instance or device context.
///
/// Units only implement the phases they list in [`intercepts`]; the chain
/// never calls a phase a unit did not ask for.
///
/// [`intercepts`]: ValidationObject::intercepts
pub trait ValidationObject: Send + Sync {
    fn kind(&self) -> UnitKind;

    /// Phases this unit overrides for `command`. Queried once, when the
    /// chain is built.
    fn intercepts(&self, command: Command) -> Phases;

    /// Establish internal state after the context exists. An error aborts
    /// the unit for the lifetime of the context.
    fn setup(&mut self) -> Result<(), SetupError> {
        Ok(())
    }

    /// Returns true when the call must not reach the driver.
    fn pre_call_validate(&self, _call: &Call, _error: &ErrorObject) -> bool {
        false
    }

    fn pre_call_record(&mut self, _call: &mut Call, _record: &RecordObject, _scratch: &mut CallScratch) {}

    fn post_call_record(&mut self, _call: &mut Call, _record: &RecordObject, _scratch: &mut CallScratch) {}

    /// Set by the unit itself after an unrecoverable internal failure.
    fn aborted(&self) -> bool {
        false
    }

    /// Release every resource the unit owns. Called exactly once, before
    /// the owning instance or device is destroyed, aborted or not.
    fn teardown(&mut self) {}
}

pub struct UnitSlot {
    kind: UnitKind,
    unit: RwLock<Box<dyn ValidationObject>>,
    aborted: AtomicBool,
    torn_down: AtomicBool,
}

impl UnitSlot {
    fn new(unit: Box<dyn ValidationObject>) -> Self {
        Self {
            kind: unit.kind(),
            unit: RwLock::new(unit),
            aborted: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// Process-wide lock shared by every chain in coarse mode.
static COARSE_LOCK: RwLock<()> = parking_lot::const_rwlock(());

/// An ordered list of units plus the per-command, per-phase intercept
/// vectors built from it.
pub struct ValidationChain {
    units: Vec<UnitSlot>,
    vectors: Vec<[Vec<usize>; 3]>,
    /// Units moved out of the active set, in abort order.
    aborted: Mutex<Vec<usize>>,
    locking: LockingMode,
    reporter: Arc<Reporter>,
}

impl ValidationChain {
    /// `units` must already be in registration order.
    pub fn new(units: Vec<Box<dyn ValidationObject>>, locking: LockingMode, reporter: Arc<Reporter>) -> Self {
        let units: Vec<UnitSlot> = units.into_iter().map(UnitSlot::new).collect();
        let mut vectors = vec![[Vec::new(), Vec::new(), Vec::new()]; Command::COUNT];
        for (index, slot) in units.iter().enumerate() {
            let unit = slot.unit.read();
            for command in Command::ALL {
                let phases = unit.intercepts(*command);
                for phase in Phase::ALL {
                    if phases.contains(phase.flag()) {
                        vectors[command.index()][phase as usize].push(index);
                    }
                }
            }
        }
        debug!(
            units = ?units.iter().map(|s| s.kind).collect::<Vec<_>>(),
            ?locking,
            "built validation chain"
        );
        Self {
            units,
            vectors,
            aborted: Mutex::new(Vec::new()),
            locking,
            reporter,
        }
    }

    pub fn locking(&self) -> LockingMode {
        self.locking
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn kinds(&self) -> Vec<UnitKind> {
        self.units.iter().map(|s| s.kind).collect()
    }

    pub fn active_kinds(&self) -> Vec<UnitKind> {
        self.units
            .iter()
            .filter(|s| !s.is_aborted())
            .map(|s| s.kind)
            .collect()
    }

    pub fn aborted_kinds(&self) -> Vec<UnitKind> {
        self.aborted.lock().iter().map(|i| self.units[*i].kind).collect()
    }

    pub fn is_active(&self, kind: UnitKind) -> bool {
        self.units.iter().any(|s| s.kind == kind && !s.is_aborted())
    }

    /// Number of units that override `phases` for `command`.
    pub fn intercept_count(&self, command: Command, phases: Phases) -> usize {
        Phase::ALL
            .iter()
            .filter(|p| phases.contains(p.flag()))
            .map(|p| self.vectors[command.index()][*p as usize].len())
            .sum()
    }

    /// Run every unit's setup, aborting the ones that fail.
    pub fn setup(&self, function: &'static str) {
        for (index, slot) in self.units.iter().enumerate() {
            let result = slot.unit.write().setup();
            if let Err(err) = result {
                self.reporter.log_error(
                    "VKGUARD-unit-setup-failed",
                    &[],
                    &Location::new(function),
                    format_args!("{} validation disabled: {}", slot.kind, err),
                );
                self.abort(index);
            }
        }
    }

    fn abort(&self, index: usize) {
        let slot = &self.units[index];
        if slot.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(unit = %slot.kind, "validation unit aborted; continuing without it");
        self.aborted.lock().push(index);
    }

    fn coarse_read(&self) -> Option<RwLockReadGuard<'static, ()>> {
        match self.locking {
            LockingMode::Coarse => Some(COARSE_LOCK.read()),
            LockingMode::Fine => None,
        }
    }

    fn coarse_write(&self) -> Option<RwLockWriteGuard<'static, ()>> {
        match self.locking {
            LockingMode::Coarse => Some(COARSE_LOCK.write()),
            LockingMode::Fine => None,
        }
    }

    fn record_phase(
        &self,
        command: Command,
        phase: Phase,
        call: &mut Call,
        record: &RecordObject,
        scratch: &mut CallScratch,
    ) {
        let _coarse = self.coarse_write();
        for &index in &self.vectors[command.index()][phase as usize] {
            let slot = &self.units[index];
            if slot.is_aborted() {
                continue;
            }
            let mut unit = slot.unit.write();
            match phase {
                Phase::RecordBefore => unit.pre_call_record(call, record, scratch),
                _ => unit.post_call_record(call, record, scratch),
            }
            if unit.aborted() {
                drop(unit);
                self.abort(index);
            }
        }
    }

    /// Drive one intercepted call. `dispatch` forwards the (possibly
    /// modified) call to the next layer and is invoked at most once.
    pub fn run(
        &self,
        command: Command,
        handle: u64,
        call: &mut Call,
        dispatch: impl FnOnce(&mut Call) -> vk::Result,
    ) -> vk::Result {
        let error = ErrorObject::new(command.name(), handle);
        let mut skip = false;
        {
            let _coarse = self.coarse_read();
            for &index in &self.vectors[command.index()][Phase::Validate as usize] {
                let slot = &self.units[index];
                if slot.is_aborted() {
                    continue;
                }
                skip |= slot.unit.read().pre_call_validate(call, &error);
            }
        }
        if skip {
            if SKIP_IGNORED.contains(&command) {
                debug!(%command, "skip requested for a teardown call; forwarding anyway");
            } else {
                trace!(%command, "call skipped by validation");
                return SKIPPED_RESULT;
            }
        }

        let mut record = RecordObject::new(command.name());
        let mut scratch = CallScratch::default();
        self.record_phase(command, Phase::RecordBefore, call, &record, &mut scratch);

        record.result = dispatch(call);

        self.record_phase(command, Phase::RecordAfter, call, &record, &mut scratch);
        record.result
    }

    /// Release every unit's resources, active or aborted. Repeated calls
    /// are no-ops per unit.
    pub fn teardown(&self) {
        for slot in &self.units {
            if !slot.torn_down.swap(true, Ordering::AcqRel) {
                slot.unit.write().teardown();
            }
        }
    }

    /// Turn the chain into pass-through: abort and tear down every unit.
    pub fn shutdown(&self) {
        for index in 0..self.units.len() {
            self.abort(index);
        }
        self.teardown();
    }
}

impl fmt::Debug for ValidationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationChain")
            .field("units", &self.kinds())
            .field("aborted", &self.aborted_kinds())
            .field("locking", &self.locking)
            .finish()
    }
}
