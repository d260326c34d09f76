// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Runtime monitor
//!
//! The entry points instrumented code calls. Every operation runs inline on
//! the calling thread. Reads are checked against the last writer's context,
//! writes only record the writer, and lock acquires check the handoff from
//! the last holder.
//!
//! Per-thread state lives in a thread-local table keyed by monitor id, so
//! several monitors can coexist in one process. A thread's context is
//! created on its first monitored operation and dropped when the thread
//! exits, when the monitor is dropped on that thread, or when the thread
//! next creates a context after the monitor is gone.

use commguard_spec::{CommunicationKind, CommunicationRole, MethodUid, SpecRegistry};
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

use crate::config::{ArrayGranularity, ContextPolicy, ErrorAction, MonitorConfig};
use crate::error::MonitorResult;
use crate::lock::LockState;
use crate::policy::CommunicationPolicy;
use crate::shadow::{ShadowStore, identity};
use crate::stack::{Stack, StackTable};
use crate::state::{ArrayShadow, ShadowSlot, State};
use crate::stats::{MonitorStats, StatsSnapshot};
use crate::thread::{ThreadContext, ThreadState};
use crate::violation::{ContextSnapshot, Violation, ViolationKind};

/// Previous and new holder when a lock changes hands
type Handoff = Option<(Arc<State>, Arc<State>)>;

static NEXT_MONITOR_ID: AtomicU64 = AtomicU64::new(0);

/// One thread's context for one monitor
struct ContextEntry {
    monitor: u64,
    /// Dead once the monitor is dropped
    alive: Weak<()>,
    context: ThreadContext,
}

thread_local! {
    static CONTEXTS: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// What a checked access touched, for violation messages
#[derive(Debug, Clone, Copy)]
enum Site<'a> {
    Unnamed,
    Field(&'a str),
    Element(usize),
    Lock,
}

impl Site<'_> {
    fn describe(self) -> Option<String> {
        match self {
            Site::Unnamed => None,
            Site::Field(name) => Some(name.to_string()),
            Site::Element(index) => Some(format!("element {index}")),
            Site::Lock => Some("lock".to_string()),
        }
    }
}

pub struct RuntimeMonitor {
    id: u64,
    registry: Arc<SpecRegistry>,
    config: MonitorConfig,
    stacks: StackTable,
    arrays: ShadowStore<Arc<ArrayShadow>>,
    locks: ShadowStore<Arc<LockState>>,
    stats: MonitorStats,
    next_thread_id: AtomicU32,
    /// Liveness token observed by thread contexts
    alive: Arc<()>,
}

impl RuntimeMonitor {
    pub fn new(registry: Arc<SpecRegistry>, config: MonitorConfig) -> MonitorResult<Self> {
        config.validate()?;
        if registry.missing_spec_policy() != config.missing_spec {
            warn!(
                registry = ?registry.missing_spec_policy(),
                config = ?config.missing_spec,
                "Registry missing-spec policy differs from monitor configuration, registry wins"
            );
        }

        let id = NEXT_MONITOR_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            monitor = id,
            policy = ?config.context_policy,
            arrays = ?config.array_granularity,
            error_action = ?config.error_action,
            "Runtime monitor started"
        );
        Ok(Self {
            id,
            arrays: ShadowStore::new(config.shadow_segments, config.shadow_store_sweep),
            locks: ShadowStore::new(config.shadow_segments, config.shadow_store_sweep),
            registry,
            config,
            stacks: StackTable::new(),
            stats: MonitorStats::new(),
            next_thread_id: AtomicU32::new(0),
            alive: Arc::new(()),
        })
    }

    pub fn with_registry(registry: Arc<SpecRegistry>) -> MonitorResult<Self> {
        Self::new(registry, MonitorConfig::default())
    }

    pub fn registry(&self) -> &Arc<SpecRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn stacks(&self) -> &StackTable {
        &self.stacks
    }

    pub fn array_shadows(&self) -> &ShadowStore<Arc<ArrayShadow>> {
        &self.arrays
    }

    pub fn lock_shadows(&self) -> &ShadowStore<Arc<LockState>> {
        &self.locks
    }

    fn with_context<R>(&self, f: impl FnOnce(&mut ThreadContext) -> R) -> R {
        CONTEXTS.with(|contexts| {
            let mut contexts = contexts.borrow_mut();
            let index = match contexts.iter().position(|entry| entry.monitor == self.id) {
                Some(index) => index,
                None => {
                    contexts.retain(|entry| entry.alive.strong_count() > 0);
                    contexts.push(ContextEntry { monitor: self.id, alive: Arc::downgrade(&self.alive), context: self.new_context() });
                    contexts.len() - 1
                }
            };
            f(&mut contexts[index].context)
        })
    }

    fn new_context(&self) -> ThreadContext {
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        let thread = Arc::new(ThreadState::current(id));
        debug!(monitor = self.id, thread = %thread, "Tracking new thread");
        ThreadContext::new(thread, self.stacks.root(), self.config.array_cache_size, self.config.lock_cache_size)
    }

    /// Drop the calling thread's context for this monitor. The next
    /// monitored operation starts a fresh thread identity.
    pub fn detach_current_thread(&self) {
        // Thread-local storage is gone during thread teardown.
        let removed = CONTEXTS.try_with(|contexts| {
            let mut contexts = contexts.borrow_mut();
            let index = contexts.iter().position(|entry| entry.monitor == self.id)?;
            Some(contexts.swap_remove(index))
        });
        drop(removed);
    }

    fn fatal(&self, message: String) -> ! {
        error!(monitor = self.id, "{}", message);
        panic!("commguard internal failure: {message}");
    }

    #[inline]
    fn profile(&self, counter: &AtomicU64) {
        if self.config.profile {
            MonitorStats::bump(counter);
        }
    }

    // -- Method entry and exit ----------------------------------------------------------

    /// Push a frame for `method` on the calling thread's stack
    pub fn enter(&self, method: MethodUid) {
        self.with_context(|ctx| {
            let stack = self.stacks.push(method, ctx.current_stack());
            ctx.push(stack);
        });
    }

    /// Push a class-initializer frame
    pub fn enter_class_init(&self) {
        self.with_context(|ctx| ctx.push(Arc::clone(self.stacks.class_initializer())));
    }

    /// Pop the innermost frame. Leaving the outermost frame returns the
    /// thread to its root context.
    pub fn exit(&self) {
        let popped = self.with_context(|ctx| {
            let popped = ctx.pop().is_some();
            if popped && ctx.depth() == 0 {
                ctx.reset();
            }
            popped
        });
        if !popped {
            self.fatal("exit without a matching enter".to_string());
        }
    }

    pub fn depth(&self) -> usize {
        self.with_context(|ctx| ctx.depth())
    }

    pub fn current_state(&self) -> Arc<State> {
        self.with_context(|ctx| Arc::clone(ctx.current()))
    }

    pub fn thread_state(&self) -> Arc<ThreadState> {
        self.with_context(|ctx| Arc::clone(&ctx.thread))
    }

    // -- Fields ------------------------------------------------------------------------

    /// Check a read of `slot` by the calling thread
    pub fn read(&self, slot: &ShadowSlot) -> MonitorResult<()> {
        self.profile(&self.stats.field_reads);
        self.check_read(slot.load(), Site::Unnamed, &self.stats.field_comm_reads)
    }

    /// [`read`](Self::read), naming the field in violations
    pub fn read_field(&self, slot: &ShadowSlot, field: &str) -> MonitorResult<()> {
        self.profile(&self.stats.field_reads);
        self.check_read(slot.load(), Site::Field(field), &self.stats.field_comm_reads)
    }

    /// Record the calling thread's context as the writer of `slot`
    pub fn write(&self, slot: &ShadowSlot) -> Arc<State> {
        let state = self.current_state();
        slot.store(Arc::clone(&state));
        state
    }

    /// Check a read of a location whose last writer is `last_writer`.
    /// Locations never written pass.
    pub fn check_read_of(&self, last_writer: Option<Arc<State>>) -> MonitorResult<()> {
        self.check_read(last_writer, Site::Unnamed, &self.stats.field_comm_reads)
    }

    fn check_read(&self, last_writer: Option<Arc<State>>, site: Site<'_>, comm_counter: &AtomicU64) -> MonitorResult<()> {
        let Some(writer) = last_writer else {
            return Ok(());
        };
        let reader = self.current_state();
        self.check_communication(&writer, &reader, ViolationKind::Sharing, site, comm_counter)
    }

    // -- Arrays ------------------------------------------------------------------------

    fn new_array_shadow(&self) -> ArrayShadow {
        match self.config.array_granularity {
            ArrayGranularity::Fine => ArrayShadow::per_index(),
            ArrayGranularity::Coarse => ArrayShadow::whole(),
        }
    }

    pub fn array_read<T: Any + Send + Sync>(&self, array: &Arc<T>, index: usize) -> MonitorResult<()> {
        self.profile(&self.stats.array_reads);
        let addr = identity(array);
        let shadow = self.with_context(|ctx| {
            let (shadow, hit) = ctx.array_cache.lookup(addr, &self.arrays);
            self.profile(if hit { &self.stats.cache_hits } else { &self.stats.cache_misses });
            shadow
        });
        match shadow {
            Some(shadow) => self.check_read(shadow.load(index), Site::Element(index), &self.stats.array_comm_reads),
            None => Ok(()),
        }
    }

    pub fn array_write<T: Any + Send + Sync>(&self, array: &Arc<T>, index: usize) -> Arc<State> {
        let addr = identity(array);
        let (shadow, state) = self.with_context(|ctx| {
            let shadow = match ctx.array_cache.get(addr) {
                Some(shadow) => {
                    self.profile(&self.stats.cache_hits);
                    Arc::clone(shadow)
                }
                None => {
                    self.profile(&self.stats.cache_misses);
                    let (key, shadow) = self.arrays.get_or_insert_with(array, || Arc::new(self.new_array_shadow()));
                    ctx.array_cache.put(addr, key, Arc::clone(&shadow));
                    shadow
                }
            };
            (shadow, Arc::clone(ctx.current()))
        });
        shadow.store(index, Arc::clone(&state));
        state
    }

    // -- Locks -------------------------------------------------------------------------

    fn lock_state(&self, ctx: &mut ThreadContext, addr: usize) -> Option<Arc<LockState>> {
        if let Some(state) = ctx.held.find_recent(addr) {
            return Some(Arc::clone(state));
        }
        let (state, hit) = ctx.lock_cache.lookup(addr, &self.locks);
        self.profile(if hit { &self.stats.cache_hits } else { &self.stats.cache_misses });
        state
    }

    /// Call right after the real lock is taken
    pub fn acquire<T: Any + Send + Sync>(&self, lock: &Arc<T>) -> MonitorResult<()> {
        self.profile(&self.stats.lock_acquires);
        let addr = identity(lock);

        let handoff = self.with_context(|ctx| -> Result<Handoff, i32> {
            if let Some(state) = ctx.held.find_recent(addr) {
                state.reenter();
                return Ok(None);
            }

            let holder = Arc::clone(ctx.current());
            let state = match ctx.lock_cache.get(addr) {
                Some(state) => {
                    self.profile(&self.stats.cache_hits);
                    Arc::clone(state)
                }
                None => {
                    self.profile(&self.stats.cache_misses);
                    let (key, state) = self.locks.get_or_insert_with(lock, || Arc::new(LockState::new(Arc::clone(&holder))));
                    ctx.lock_cache.put(addr, key, Arc::clone(&state));
                    state
                }
            };

            let (depth, previous) = state.take_over(&holder)?;
            if depth == 1 {
                ctx.held.push(addr, state);
            }
            Ok(previous.map(|previous| (previous, holder)))
        });

        match handoff {
            Err(depth) => self.fatal(format!("lock depth {depth} at acquire, lock scoping is broken")),
            Ok(Some((previous, holder))) if self.config.lock_tracking => {
                self.check_communication(&previous, &holder, ViolationKind::Synchronization, Site::Lock, &self.stats.lock_comm_acquires)
            }
            Ok(_) => Ok(()),
        }
    }

    /// Call right before the real lock is released. Never checks.
    pub fn release<T: Any + Send + Sync>(&self, lock: &Arc<T>) {
        let addr = identity(lock);
        let depth = self.with_context(|ctx| {
            let state = self.lock_state(ctx, addr)?;
            let depth = state.exit();
            if depth == 0 {
                ctx.held.remove(addr);
            }
            Some(depth)
        });
        match depth {
            None => self.fatal("release of a lock that was never acquired".to_string()),
            Some(depth) if depth < 0 => self.fatal(format!("lock depth {depth} at release, lock scoping is broken")),
            Some(_) => {}
        }
    }

    /// Call before waiting on `lock`. Returns the depth to hand back to
    /// [`postwait`](Self::postwait).
    pub fn prewait<T: Any + Send + Sync>(&self, lock: &Arc<T>) -> i32 {
        let addr = identity(lock);
        let saved = self.with_context(|ctx| {
            let state = self.lock_state(ctx, addr)?;
            let saved = state.suspend();
            ctx.held.remove(addr);
            Some(saved)
        });
        match saved {
            Some(depth) if depth > 0 => depth,
            Some(depth) => self.fatal(format!("prewait at lock depth {depth}")),
            None => self.fatal("prewait on a lock that was never acquired".to_string()),
        }
    }

    /// Call after returning from a wait. The lock may have changed hands
    /// meanwhile, which is checked like an acquire.
    pub fn postwait<T: Any + Send + Sync>(&self, lock: &Arc<T>, depth: i32) -> MonitorResult<()> {
        self.profile(&self.stats.lock_acquires);
        let addr = identity(lock);
        let resumed = self.with_context(|ctx| {
            let state = self.lock_state(ctx, addr)?;
            let holder = Arc::clone(ctx.current());
            let resumed = state.resume(depth, &holder).map(|previous| previous.map(|p| (p, holder)));
            if resumed.is_ok() && depth > 0 {
                ctx.held.push(addr, state);
            }
            Some(resumed)
        });
        match resumed {
            None => self.fatal("postwait on a lock that was never acquired".to_string()),
            Some(Err(found)) => self.fatal(format!("postwait found lock depth {found}, expected 0")),
            Some(Ok(Some((previous, holder)))) if self.config.lock_tracking => {
                self.check_communication(&previous, &holder, ViolationKind::Synchronization, Site::Lock, &self.stats.lock_comm_acquires)
            }
            Some(Ok(_)) => Ok(()),
        }
    }

    // -- Checking ----------------------------------------------------------------------

    fn check_communication(
        &self,
        writer: &Arc<State>,
        reader: &Arc<State>,
        kind: ViolationKind,
        site: Site<'_>,
        comm_counter: &AtomicU64,
    ) -> MonitorResult<()> {
        if Arc::ptr_eq(writer, reader) || (!self.config.intra_thread && writer.same_thread(reader)) {
            return Ok(());
        }
        self.profile(comm_counter);
        if self.allowed(writer.stack(), reader.stack()) { Ok(()) } else { self.report(kind, writer, reader, site) }
    }

    fn allowed(&self, writer: &Stack, reader: &Stack) -> bool {
        let policy = CommunicationPolicy::new(&self.registry, self.config.context_policy);
        match self.config.context_policy {
            ContextPolicy::TopFrame => {
                self.profile(&self.stats.slow_paths);
                policy.check(writer, reader).is_allowed()
            }
            ContextPolicy::Layered => {
                let writer_id = self.stacks.id_of(writer);
                if reader.memo_contains(writer_id) {
                    return true;
                }
                self.profile(&self.stats.slow_paths);
                let allowed = policy.check(writer, reader).is_allowed();
                if allowed {
                    reader.memo_insert(writer_id);
                }
                allowed
            }
        }
    }

    fn report(&self, kind: ViolationKind, writer: &State, reader: &State, site: Site<'_>) -> MonitorResult<()> {
        MonitorStats::bump(&self.stats.violations);
        let violation = Violation {
            kind,
            writer: ContextSnapshot::capture(writer, &self.stacks, &self.registry),
            reader: ContextSnapshot::capture(reader, &self.stacks, &self.registry),
            location: site.describe(),
            backtrace: self.config.capture_backtraces.then(|| Backtrace::force_capture().to_string()),
        };

        match self.config.error_action {
            ErrorAction::Halt => {
                error!(monitor = self.id, kind = ?kind, "{}", violation);
                panic!("{violation}");
            }
            ErrorAction::Throw => {
                warn!(monitor = self.id, kind = ?kind, "{}", violation.message());
                Err(violation.into())
            }
            ErrorAction::Warn => {
                warn!(monitor = self.id, kind = ?kind, "{}", violation);
                Ok(())
            }
            ErrorAction::Ignore => {
                debug!(monitor = self.id, kind = ?kind, "{}", violation.message());
                Ok(())
            }
        }
    }

    // -- Introspection -----------------------------------------------------------------

    pub fn method_signature(&self, uid: MethodUid) -> Option<String> {
        self.registry.method_signature(uid)
    }

    pub fn communication_kind(&self, uid: MethodUid) -> CommunicationKind {
        self.registry.communication_kind(uid)
    }

    pub fn communication_role(&self, uid: MethodUid) -> Option<CommunicationRole> {
        self.registry.module_of(uid)?.communication_role(uid)
    }

    /// Render a stack with module names and signatures
    pub fn describe_stack(&self, stack: &Stack) -> String {
        stack.display(&self.registry).to_string()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.distinct_stacks = self.stacks.len() as u64;
        snapshot.threads = self.next_thread_id.load(Ordering::Relaxed) as u64;
        snapshot
    }

    /// Drop shadow entries whose objects are gone
    pub fn sweep(&self) -> usize {
        self.arrays.sweep() + self.locks.sweep()
    }
}

impl Drop for RuntimeMonitor {
    fn drop(&mut self) {
        self.detach_current_thread();
        debug!(monitor = self.id, "Runtime monitor stopped");
    }
}

impl fmt::Debug for RuntimeMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeMonitor")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("stacks", &self.stacks.len())
            .field("array_shadows", &self.arrays.len())
            .field("lock_shadows", &self.locks.len())
            .finish()
    }
}
