//! Central coordinator managing global virtual time (GVT) and checkpointing across planets.
//! The `Galaxy` handles inter-planetary message delivery, GVT calculation, and throttling to
//! maintain causality constraints in the optimistic parallel simulation.
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};

use bytemuck::{Pod, Zeroable};
use mesocarp::{comms::mailbox::ThreadedMessenger, scheduling::Scheduleable, MesoError};

use crate::{
    mt::hybrid::{director::CloneDirector, planet::RegistryOutput},
    objects::{CloneOrder, Decision, Mail},
    st::TimeInfo,
    AikaError,
};

/// Signature for a registered GVT hook: given the world that requested it and the
/// recorded `Decision`, the hook picks a destination world (or `None` to decline),
/// matching `original_source`'s `clone_director_gvt_hook`.
pub type GvtHook = Box<dyn Fn(usize, Decision, &[usize]) -> Option<usize> + Send>;

/// A `Galaxy` updates the global synchronization checkpoint and handles interplanetary message passing.
pub struct Galaxy<
    const INTER_SLOTS: usize,
    const CLOCK_SLOTS: usize,
    const CLOCK_HEIGHT: usize,
    MessageType: Pod + Zeroable + Clone,
> {
    pub messenger: ThreadedMessenger<INTER_SLOTS, Mail<MessageType>>,
    pub lvts: Vec<Arc<AtomicU64>>,
    pub gvt: Arc<AtomicU64>,
    pub send_counters: Vec<Arc<AtomicUsize>>,
    pub recv_counters: Vec<Arc<AtomicUsize>>,
    pub next_checkpoint: Arc<AtomicU64>,
    pub checkpoint_frequency: u64,
    pub throttle_horizon: u64,
    /// how many `gvt_daemon` loop passes elapse between GVT reduction attempts
    /// (spec.md §4.5 "periodically, every N dequeues or on idle").
    pub gvt_interval: u64,
    passes_since_recalc: u64,
    pub registered: usize,
    /// per-world decision slot, shared with that world's `PlanetContext`
    pub decisions: Vec<Arc<Mutex<Option<Decision>>>>,
    /// per-world hook-trigger flag, shared with that world's `PlanetContext`
    pub hook_triggers: Vec<Arc<AtomicBool>>,
    /// per-world clone-order slot, shared with that world's `PlanetContext`
    pub clone_orders: Vec<Arc<Mutex<Option<CloneOrder>>>>,
    /// the registered clone/branch director callback, invoked from the GVT daemon
    /// whenever any world's hook-trigger flag is set (spec.md §4.5/§4.6).
    gvt_hook: Option<GvtHook>,
    /// arbitrates pending decisions into `CloneOrder`s and rejects recursive clones.
    director: CloneDirector,
    time_info: TimeInfo,
}

impl<
        const INTER_SLOTS: usize,
        const CLOCK_SLOTS: usize,
        const CLOCK_HEIGHT: usize,
        MessageType: Pod + Zeroable + Clone,
    > Galaxy<INTER_SLOTS, CLOCK_SLOTS, CLOCK_HEIGHT, MessageType>
{
    pub fn new(
        num_world: usize,
        throttle_horizon: u64,
        checkpoint_frequency: u64,
        terminal: f64,
        timestep: f64,
        gvt_interval: u64,
    ) -> Result<Self, AikaError> {
        let gvt = Arc::new(AtomicU64::new(0));
        let mut world_ids = Vec::new();
        for i in 0..num_world {
            world_ids.push(i);
        }
        let messenger = ThreadedMessenger::new(world_ids)?;
        Ok(Self {
            messenger,
            lvts: Vec::new(),
            gvt,
            send_counters: Vec::new(),
            recv_counters: Vec::new(),
            next_checkpoint: Arc::new(AtomicU64::new(checkpoint_frequency)),
            checkpoint_frequency,
            throttle_horizon,
            gvt_interval: gvt_interval.max(1),
            passes_since_recalc: 0,
            time_info: TimeInfo { timestep, terminal },
            registered: 0,
            decisions: Vec::new(),
            hook_triggers: Vec::new(),
            clone_orders: Vec::new(),
            gvt_hook: None,
            director: CloneDirector::new(),
        })
    }

    /// Register the clone/branch director's hook. Only one hook may be registered;
    /// a second call replaces the first, matching `g_tw_gvt_hook` in `original_source`
    /// being a single global function pointer.
    pub fn register_gvt_hook(&mut self, hook: GvtHook) {
        self.gvt_hook = Some(hook);
    }

    pub fn spawn_world(&mut self) -> Result<RegistryOutput<INTER_SLOTS, MessageType>, AikaError> {
        let arc = Arc::clone(&self.gvt);

        let lvt = Arc::new(AtomicU64::new(0));
        let out = Arc::clone(&lvt);

        self.lvts.push(lvt);

        let user = self.messenger.get_user(self.registered)?;
        let world_id = self.registered;

        let send = Arc::new(AtomicUsize::new(0));
        let send_clone = Arc::clone(&send);

        let recv = Arc::new(AtomicUsize::new(0));
        let recv_clone = Arc::clone(&recv);

        let decision = Arc::new(Mutex::new(None));
        let hook_trigger = Arc::new(AtomicBool::new(false));
        let clone_order = Arc::new(Mutex::new(None));
        self.decisions.push(Arc::clone(&decision));
        self.hook_triggers.push(Arc::clone(&hook_trigger));
        self.clone_orders.push(Arc::clone(&clone_order));

        self.registered += 1;
        let output = RegistryOutput::new(
            arc,
            out,
            send_clone,
            recv_clone,
            Arc::clone(&self.next_checkpoint),
            user,
            world_id,
            decision,
            hook_trigger,
            clone_order,
        );
        self.send_counters.push(send);
        self.recv_counters.push(recv);
        Ok(output)
    }

    fn deliver_the_mail(&mut self) -> Result<u64, AikaError> {
        match self.messenger.poll() {
            Ok(msgs) => {
                let mut lowest = u64::MAX;
                for (_, mail) in &msgs {
                    let time = mail.transfer.commit_time();
                    if time < lowest {
                        lowest = time;
                    }
                }
                self.messenger.deliver(msgs)?;
                tracing::trace!("found messages to transfer");
                Ok(lowest)
            }
            Err(err) => {
                if let MesoError::NoDirectCommsToShare = err {
                    Ok(u64::MAX)
                } else {
                    Err(AikaError::MesoError(err))
                }
            }
        }
    }

    fn recalc_gvt(&mut self, in_transit_floor: u64) -> Result<(), AikaError> {
        // this is a lazy gvt implementation. it works for the purposes used here
        // but it ultimately is out of date by up to min(throttle_horizon, checkpoint_frequency)
        let total_sends: usize = self
            .send_counters
            .iter()
            .map(|x| x.load(Ordering::Relaxed))
            .sum();
        let total_recvs: usize = self
            .recv_counters
            .iter()
            .map(|x| x.load(Ordering::Relaxed))
            .sum();
        tracing::trace!(total_sends, total_recvs, "gvt reduction pass");
        let in_flight = total_sends.saturating_sub(total_recvs);
        if in_flight > 0 {
            tracing::trace!(in_flight, "unprocessed messages in gvt thread");
            return Ok(());
        }
        let new_time = self.gvt.load(Ordering::Acquire);

        let mut lowest = u64::MAX;
        let mut all = Vec::new();
        for local in &self.lvts {
            let load = local.load(Ordering::Acquire);
            if load < lowest {
                lowest = load;
            }
            all.push(load);
        }

        if in_transit_floor < lowest {
            tracing::trace!("message still in transit below candidate gvt");
            return Ok(());
        }
        if new_time > lowest {
            tracing::warn!(?all, new_time, lowest, "time travel: gvt moved past a local clock");
            return Ok(());
        }
        if lowest == u64::MAX {
            return Ok(());
        }
        tracing::debug!(?all, gvt = lowest, "advancing gvt");
        self.gvt.store(lowest, Ordering::Release);
        self.poll_director_hooks(lowest)?;
        Ok(())
    }

    /// Check every world's hook-trigger flag; for any that are set and whose decision
    /// has fallen behind GVT, hand it to the `CloneDirector` for arbitration
    /// (spec.md §4.6 clone trigger). "Idle" destinations are worlds other than the
    /// source whose local time has already caught up to GVT.
    fn poll_director_hooks(&mut self, gvt: u64) -> Result<(), AikaError> {
        if self.gvt_hook.is_none() {
            return Ok(());
        }
        for world_id in 0..self.hook_triggers.len() {
            if !self.hook_triggers[world_id].load(Ordering::Acquire) {
                continue;
            }
            let decision = {
                let slot = self.decisions[world_id].lock().unwrap();
                *slot
            };
            let Some(decision) = decision else {
                self.hook_triggers[world_id].store(false, Ordering::Release);
                continue;
            };
            if decision.timestamp > gvt {
                // decision not yet globally safe to act on
                continue;
            }
            let idle: Vec<usize> = (0..self.registered)
                .filter(|&w| w != world_id && self.lvts[w].load(Ordering::Acquire) == gvt)
                .collect();
            let hook = self.gvt_hook.as_ref().unwrap();
            self.director
                .dispatch(world_id, decision, &idle, hook, &self.clone_orders)?;
            self.hook_triggers[world_id].store(false, Ordering::Release);
            let mut slot = self.decisions[world_id].lock().unwrap();
            *slot = None;
        }
        Ok(())
    }

    fn check_mail_and_gvt(&mut self) -> Result<(), AikaError> {
        let transit_time = self.deliver_the_mail()?;
        self.recalc_gvt(transit_time)?;
        Ok(())
    }

    pub fn gvt_daemon(&mut self) -> Result<(), AikaError> {
        loop {
            self.passes_since_recalc += 1;
            if self.passes_since_recalc >= self.gvt_interval {
                self.passes_since_recalc = 0;
                self.check_mail_and_gvt()?;
            }

            let current_gvt = self.gvt.load(Ordering::Acquire);

            // Check if all LPs have reached terminal
            let all_terminal = self.lvts.iter().all(|lvt| {
                let lvt_val = lvt.load(Ordering::Acquire);
                lvt_val as f64 * self.time_info.timestep >= self.time_info.terminal
            });

            if all_terminal {
                tracing::debug!("all worlds reached terminal time, gvt daemon shutting down");
                break;
            }

            // Handle checkpointing
            if current_gvt >= self.next_checkpoint.load(Ordering::Acquire) {
                self.next_checkpoint
                    .store(current_gvt + self.checkpoint_frequency, Ordering::Release);
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    pub fn time_info(&self) -> (f64, f64) {
        (self.time_info.timestep, self.time_info.terminal)
    }
}
