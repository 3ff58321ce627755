//! Individual threaded simulation world containing agents and local event processing.
//! Each `Planet` runs independently with its own local time, handling agent execution, local
//! messaging, and rollback operations when causality violations are detected.
use std::{
    cmp::Reverse,
    collections::{BTreeSet, BinaryHeap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread::sleep,
    time::Duration,
};

use bytemuck::{Pod, Zeroable};
use mesocarp::{
    comms::mailbox::ThreadedMessengerUser,
    logging::journal::Journal,
    scheduling::Scheduleable,
};

use crate::{
    agents::{PlanetContext, ThreadedAgent},
    objects::{
        Action, AntiMsg, CloneOrder, Decision, Event, LocalEventSystem, LocalMailSystem, Mail, Msg,
        Transfer,
    },
    st::TimeInfo,
    AikaError,
};

/// The registry information required to spawn a new `Planet` in a `Galaxy`
pub struct RegistryOutput<const SLOTS: usize, MessageType: Pod + Zeroable + Clone> {
    gvt: Arc<AtomicU64>,
    send_counter: Arc<AtomicUsize>,
    recv_counter: Arc<AtomicUsize>,
    lvt: Arc<AtomicU64>,
    checkpoint: Arc<AtomicU64>,
    user: ThreadedMessengerUser<SLOTS, Mail<MessageType>>,
    world_id: usize,
    decision: Arc<Mutex<Option<Decision>>>,
    hook_trigger: Arc<AtomicBool>,
    clone_order: Arc<Mutex<Option<CloneOrder>>>,
}

impl<const SLOTS: usize, MessageType: Pod + Zeroable + Clone> RegistryOutput<SLOTS, MessageType> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gvt: Arc<AtomicU64>,
        lvt: Arc<AtomicU64>,
        send_counter: Arc<AtomicUsize>,
        recv_counter: Arc<AtomicUsize>,
        checkpoint: Arc<AtomicU64>,
        user: ThreadedMessengerUser<SLOTS, Mail<MessageType>>,
        world_id: usize,
        decision: Arc<Mutex<Option<Decision>>>,
        hook_trigger: Arc<AtomicBool>,
        clone_order: Arc<Mutex<Option<CloneOrder>>>,
    ) -> Self {
        Self {
            gvt,
            lvt,
            send_counter,
            recv_counter,
            checkpoint,
            user,
            world_id,
            decision,
            hook_trigger,
            clone_order,
        }
    }
}

/// A `Planet` is much like `World`, except is equipped with "inter-planetary" messaging and rollback functionality.
pub struct Planet<
    const INTER_SLOTS: usize,
    const CLOCK_SLOTS: usize,
    const CLOCK_HEIGHT: usize,
    MessageType: Pod + Zeroable + Clone,
> {
    pub agents: Vec<Box<dyn ThreadedAgent<INTER_SLOTS, MessageType>>>,
    pub context: PlanetContext<INTER_SLOTS, MessageType>,
    time_info: TimeInfo,
    event_system: LocalEventSystem<CLOCK_SLOTS, CLOCK_HEIGHT>,
    local_messages: LocalMailSystem<CLOCK_SLOTS, CLOCK_HEIGHT, MessageType>,
    gvt: Arc<AtomicU64>,
    next_checkpoint: Arc<AtomicU64>,
    local_time: Arc<AtomicU64>,
    throttle_horizon: u64,
    recv_counter: Arc<AtomicUsize>,
    /// minimum timestamp delta a forward handler may schedule at, enforced in `commit`
    /// and `commit_mail` (spec.md §4.4 lookahead).
    lookahead: u64,
    /// per-agent log of timestamps at which `step`/`read_message` were dispatched,
    /// oldest first. `rollback` pops entries at or past the rollback point in LIFO
    /// order and calls `ThreadedAgent::reverse`; fossil collection pops entries older
    /// than GVT in FIFO order and calls `ThreadedAgent::commit` (spec.md §4.4).
    processed: Vec<VecDeque<u64>>,
    /// highest GVT value fossil collection has already run against, to avoid
    /// rescanning `processed` every `run()` iteration.
    last_fossil_gvt: u64,
}

unsafe impl<
        const INTER_SLOTS: usize,
        const CLOCK_SLOTS: usize,
        const CLOCK_HEIGHT: usize,
        MessageType: Pod + Zeroable + Clone,
    > Send for Planet<INTER_SLOTS, CLOCK_SLOTS, CLOCK_HEIGHT, MessageType>
{
}
unsafe impl<
        const INTER_SLOTS: usize,
        const CLOCK_SLOTS: usize,
        const CLOCK_HEIGHT: usize,
        MessageType: Pod + Zeroable + Clone,
    > Sync for Planet<INTER_SLOTS, CLOCK_SLOTS, CLOCK_HEIGHT, MessageType>
{
}

impl<
        const INTER_SLOTS: usize,
        const CLOCK_SLOTS: usize,
        const CLOCK_HEIGHT: usize,
        MessageType: Pod + Zeroable + Clone,
    > Planet<INTER_SLOTS, CLOCK_SLOTS, CLOCK_HEIGHT, MessageType>
{
    /// Create a new `Planet` given the provided time information, `Galaxy` registry output, and arena allocation sizes.
    pub fn create(
        terminal: f64,
        timestep: f64,
        throttle_horizon: u64,
        world_arena_size: usize,
        anti_msg_arena_size: usize,
        registry: RegistryOutput<INTER_SLOTS, MessageType>,
    ) -> Result<Self, AikaError> {
        Self::create_with_lookahead(
            terminal,
            timestep,
            throttle_horizon,
            0,
            world_arena_size,
            anti_msg_arena_size,
            registry,
        )
    }

    /// Like [`Self::create`], additionally setting the lookahead enforced on every
    /// scheduled event and message (spec.md §4.4).
    pub fn create_with_lookahead(
        terminal: f64,
        timestep: f64,
        throttle_horizon: u64,
        lookahead: u64,
        world_arena_size: usize,
        anti_msg_arena_size: usize,
        registry: RegistryOutput<INTER_SLOTS, MessageType>,
    ) -> Result<Self, AikaError> {
        Ok(Self {
            agents: Vec::new(),
            context: PlanetContext::with_director_slots(
                world_arena_size,
                anti_msg_arena_size,
                registry.user,
                registry.world_id,
                registry.send_counter,
                registry.decision,
                registry.hook_trigger,
                registry.clone_order,
            ),
            time_info: TimeInfo { terminal, timestep },
            event_system: LocalEventSystem::<CLOCK_SLOTS, CLOCK_HEIGHT>::new()?,
            local_messages: LocalMailSystem::new()?,
            gvt: registry.gvt,
            next_checkpoint: registry.checkpoint,
            local_time: registry.lvt,
            throttle_horizon,
            recv_counter: registry.recv_counter,
            lookahead,
            processed: Vec::new(),
            last_fossil_gvt: 0,
        })
    }
    /// Creates a new `Planet` from registry, time, and HybridConfig information.
    pub fn from_config(
        world_consts: (usize, usize, &Vec<usize>),
        terminal: f64,
        timestep: f64,
        throttle_horizon: u64,
        registry: RegistryOutput<INTER_SLOTS, MessageType>,
    ) -> Result<Self, AikaError> {
        Self::from_config_with_lookahead(world_consts, terminal, timestep, throttle_horizon, 0, registry)
    }

    /// Like [`Self::from_config`], additionally setting the lookahead.
    #[allow(clippy::too_many_arguments)]
    pub fn from_config_with_lookahead(
        world_consts: (usize, usize, &Vec<usize>),
        terminal: f64,
        timestep: f64,
        throttle_horizon: u64,
        lookahead: u64,
        registry: RegistryOutput<INTER_SLOTS, MessageType>,
    ) -> Result<Self, AikaError> {
        let mut context = PlanetContext::with_director_slots(
            world_consts.0,
            world_consts.1,
            registry.user,
            registry.world_id,
            registry.send_counter,
            registry.decision,
            registry.hook_trigger,
            registry.clone_order,
        );
        let mut processed = Vec::new();
        for _ in world_consts.2 {
            processed.push(VecDeque::new());
        }
        for i in world_consts.2 {
            context.agent_states.push(Journal::init(*i));
        }
        Ok(Self {
            agents: Vec::new(),
            context,
            time_info: TimeInfo { terminal, timestep },
            event_system: LocalEventSystem::<CLOCK_SLOTS, CLOCK_HEIGHT>::new()?,
            local_messages: LocalMailSystem::new()?,
            gvt: registry.gvt,
            next_checkpoint: registry.checkpoint,
            local_time: registry.lvt,
            throttle_horizon,
            recv_counter: registry.recv_counter,
            lookahead,
            processed,
            last_fossil_gvt: 0,
        })
    }

    fn commit(&mut self, event: Event) {
        self.event_system.insert(event)
    }

    fn commit_mail(&mut self, msg: Msg<MessageType>) {
        let msg = self.local_messages.schedule.insert(msg);
        if msg.is_err() {
            self.local_messages
                .overflow
                .push(Reverse(msg.err().unwrap()));
        }
    }

    /// Schedule an event for an agent at a given time.
    pub fn schedule(&mut self, time: u64, agent: usize) -> Result<(), AikaError> {
        if time < self.now() {
            return Err(AikaError::TimeTravel);
        } else if time as f64 * self.time_info.timestep > self.time_info.terminal {
            return Err(AikaError::PastTerminal);
        }
        let now = self.now();
        self.commit(Event::new(now, time, agent, Action::Wait));
        Ok(())
    }

    /// Get the current time of the simulation.
    #[inline(always)]
    pub fn now(&self) -> u64 {
        self.event_system.local_clock.time
    }

    /// Get the time information of the simulation.
    pub fn time_info(&self) -> (f64, f64) {
        (self.time_info.timestep, self.time_info.terminal)
    }

    /// Spawn a new `ThreadedAgent` on the `Planet` with the provided agent state arena allocation size.
    pub fn spawn_agent(
        &mut self,
        agent: Box<dyn ThreadedAgent<INTER_SLOTS, MessageType>>,
        state_arena_size: usize,
    ) -> usize {
        self.agents.push(agent);
        self.context
            .agent_states
            .push(Journal::init(state_arena_size));
        self.processed.push(VecDeque::new());
        self.agents.len() - 1
    }

    /// Spawn a preconfigured `ThreadedAgent`.
    pub fn spawn_agent_preconfigured(
        &mut self,
        agent: Box<dyn ThreadedAgent<INTER_SLOTS, MessageType>>,
    ) -> usize {
        self.agents.push(agent);
        if self.processed.len() < self.agents.len() {
            self.processed.push(VecDeque::new());
        }
        self.agents.len() - 1
    }

    fn rollback(&mut self, time: u64) -> Result<(), AikaError> {
        let now = self.event_system.local_clock.time;
        if time > now {
            return Err(AikaError::TimeTravel);
        }
        self.context.world_state.rollback(time);
        for i in &mut self.context.agent_states {
            i.rollback(time);
        }
        {
            let agents = &mut self.agents;
            let context = &mut self.context;
            for (i, log) in self.processed.iter_mut().enumerate() {
                while let Some(&last) = log.back() {
                    if last < time {
                        break;
                    }
                    log.pop_back();
                    agents[i].reverse(context, i);
                }
            }
        }
        self.local_messages
            .schedule
            .rollback(&mut self.local_messages.overflow, time);
        let anti_msgs: Vec<(Mail<MessageType>, u64)> = self.context.anti_msgs.rollback_return(time);
        for (anti, _) in anti_msgs {
            if let Some(to) = anti.to_world {
                if to == self.context.world_id {
                    let anti = anti.open_letter();
                    if let Transfer::AntiMsg(anti) = anti {
                        self.annihilate(anti);
                    }
                    continue;
                }
            }
            self.context.user.send(anti)?;
        }

        self.event_system.local_clock.rollback(&mut self.event_system.overflow, time);
        self.local_time.store(time, Ordering::Release);

        // a decision recorded after the rollback point is no longer valid; the forward
        // handler that recorded it will run again once time catches back up.
        {
            let decision_arc = self.context.decision_slot();
            let mut slot = decision_arc.lock().unwrap();
            if matches!(*slot, Some(d) if d.timestamp >= time) {
                *slot = None;
                drop(slot);
                self.context.trigger_hook_now_rev();
            }
        }

        tracing::debug!(world_id = self.context.world_id, rollback_time = time, prior = now, "rollback");
        Ok(())
    }

    /// Pop and commit every processed entry older than `gvt`, in the order they were
    /// originally processed (spec.md §4.4 COMMIT). No-op if `gvt` hasn't advanced
    /// since the last call.
    fn fossil_collect(&mut self, gvt: u64) {
        if gvt <= self.last_fossil_gvt {
            return;
        }
        self.last_fossil_gvt = gvt;
        let agents = &mut self.agents;
        let context = &mut self.context;
        for (i, log) in self.processed.iter_mut().enumerate() {
            while let Some(&first) = log.front() {
                if first >= gvt {
                    break;
                }
                log.pop_front();
                agents[i].commit(context, i);
            }
        }
    }

    fn annihilate(&mut self, anti_msg: AntiMsg) {
        let time = anti_msg.time();
        let idxs = self.local_messages.schedule.current_idxs;
        let diff = (time - self.local_messages.schedule.time) as usize;
        for (k, idx) in idxs.iter().enumerate().take(CLOCK_HEIGHT) {
            let startidx = ((CLOCK_SLOTS).pow(1 + k as u32) - CLOCK_SLOTS) / (CLOCK_SLOTS - 1); // start index for each level
            let endidx = ((CLOCK_SLOTS).pow(2 + k as u32) - CLOCK_SLOTS) / (CLOCK_SLOTS - 1) - 1; // end index for each level
            if diff >= startidx {
                if diff
                    >= (((CLOCK_SLOTS).pow(1 + CLOCK_HEIGHT as u32) - CLOCK_SLOTS)
                        / (CLOCK_SLOTS - 1))
                {
                    break;
                }
                if diff > endidx {
                    continue;
                }
                let offset = ((diff - startidx) / (CLOCK_SLOTS.pow(k as u32)) + idx) % CLOCK_SLOTS;
                let msgs = &mut self.local_messages.schedule.wheels[k][offset];
                let mut remaining = Vec::new();
                while let Some(msg) = msgs.pop() {
                    if anti_msg.annihilate(&msg) {
                        continue;
                    }
                    remaining.push(msg);
                }
                *msgs = remaining;
                return;
            }
        }
        // fallback if timestamp beyond clock horizon
        let mut to_be_removed = BTreeSet::new();
        for i in self.local_messages.overflow.iter().enumerate() {
            if anti_msg.annihilate(&i.1 .0) {
                to_be_removed.insert(Reverse(i.0));
            }
        }
        let current = self.local_messages.overflow.clone();
        let mut vec = current.into_iter().collect::<Vec<_>>();
        for i in to_be_removed {
            let idx = i.0;
            vec.remove(idx);
        }
        self.local_messages.overflow = BinaryHeap::from_iter(vec);
    }

    fn poll_interplanetary_messenger(&mut self) -> Result<(), AikaError> {
        let mut counter = 0;
        let maybe = self.context.user.poll();
        if maybe.is_none() {
            return Ok(());
        }
        for msg in maybe.unwrap() {
            if let Some(to) = msg.to_world {
                if to != self.context.world_id {
                    return Err(AikaError::MismatchedDeliveryAddress);
                }
            }
            let time = msg.transfer.time();
            tracing::trace!(world_id = self.context.world_id, time, "opening mail");
            if time < self.now() {
                tracing::debug!(
                    world_id = self.context.world_id,
                    recv_time = time,
                    local_clock = self.now(),
                    "straggler message, rolling back"
                );
                self.rollback(time)?;
            }
            match msg.open_letter() {
                Transfer::Msg(msg) => self.commit_mail(msg),
                Transfer::AntiMsg(anti_msg) => self.annihilate(anti_msg),
                Transfer::State(packet) => {
                    if let Some(agent) = self.agents.get_mut(packet.agent) {
                        agent.import_state(packet.payload());
                    }
                }
            }
            counter += 1;
        }
        if counter == 0 {
            return Ok(())
        }
        let current = self.recv_counter.fetch_add(counter, Ordering::AcqRel);
        tracing::trace!(world_id = self.context.world_id, current, counter, "polled interplanetary mail");
        Ok(())
    }

    /// Verify a forward handler's requested dt respects the configured lookahead
    /// (spec.md §4.4). `lookahead == 0` disables the check, matching single-PE runs
    /// where no causality window is needed.
    fn check_lookahead(&self, agent: usize, dt: u64) -> Result<(), AikaError> {
        if self.lookahead > 0 && dt < self.lookahead {
            return Err(AikaError::LookaheadViolation {
                agent,
                dt,
                lookahead: self.lookahead,
            });
        }
        Ok(())
    }

    /// step forward one timestamp on all local clocks
    fn step(&mut self) -> Result<(), AikaError> {
        self.check_time_validity()?;

        // process messages at the next time step
        if let Ok(msgs) = self.local_messages.schedule.tick() {
            for msg in msgs {
                self.context.time = msg.time();
                let id = msg.to;
                if id.is_none() {
                    for i in 0..self.agents.len() {
                        self.agents[i].read_message(&mut self.context, msg, i);
                        self.processed[i].push_back(self.context.time);
                    }
                    continue;
                }
                let id = id.unwrap();
                self.agents[id].read_message(&mut self.context, msg, id);
                self.processed[id].push_back(self.context.time);
            }
        }
        // process events at the next time step
        if let Ok(events) = self.event_system.local_clock.tick() {
            for event in events {
                self.context.time = event.time;
                self.context.clear_bitfield();
                let event = self.agents[event.agent].step(&mut self.context, event.agent);
                self.processed[event.agent].push_back(self.context.time);
                match event.yield_ {
                    Action::Timeout(time) => {
                        self.check_lookahead(event.agent, time)?;
                        if (self.now() + time) as f64 * self.time_info.timestep
                            > self.time_info.terminal
                        {
                            continue;
                        }

                        self.commit(Event::new(
                            self.now(),
                            self.now() + time,
                            event.agent,
                            Action::Wait,
                        ));
                    }
                    Action::Schedule(time) => {
                        let dt = time.saturating_sub(self.now());
                        self.check_lookahead(event.agent, dt)?;
                        self.commit(Event::new(self.now(), time, event.agent, Action::Wait));
                    }
                    Action::Trigger { time, idx } => {
                        let dt = time.saturating_sub(self.now());
                        self.check_lookahead(event.agent, dt)?;
                        self.commit(Event::new(self.now(), time, idx, Action::Wait));
                    }
                    Action::Wait => {}
                    Action::Break => {
                        break;
                    }
                }
            }
        }
        self.increment();
        std::thread::yield_now();
        Ok(())
    }

    fn increment(&mut self) {
        self.event_system
            .local_clock
            .increment(&mut self.event_system.overflow);
        self.local_messages
            .schedule
            .increment(&mut self.local_messages.overflow);
        self.context.time += 1;
        self.local_time.store(self.now(), Ordering::Release);
    }

    fn check_time_validity(&self) -> Result<(), AikaError> {
        let load = self.local_time.load(Ordering::Acquire);
        if self.local_messages.schedule.time != self.event_system.local_clock.time
            && self.local_messages.schedule.time != load
        {
            return Err(AikaError::ClockSyncIssue);
        }
        if self.time_info.terminal <= self.time_info.timestep * load as f64 {
            return Err(AikaError::PastTerminal);
        }
        let gvt = self.gvt.load(Ordering::Acquire);
        if gvt as f64 * self.time_info.timestep >= self.time_info.terminal {
            return Err(AikaError::PastTerminal);
        }
        tracing::trace!(gvt, local = load, world_id = self.context.world_id, "time validity check passed");
        Ok(())
    }

    /// Run the `Planet` to one agent's worth of completion, i.e. until every agent's
    /// `finalize` has been called once the terminal time is reached (spec.md §4.4
    /// FINALIZE).
    pub fn run(&mut self) -> Result<(), AikaError> {
        let id = self.context.world_id;
        loop {
            if let Some(order) = self.take_clone_order() {
                self.handle_clone_order(order)?;
                continue;
            }
            let checkpoint = self.next_checkpoint.load(Ordering::SeqCst);
            let now = self.now();
            self.poll_interplanetary_messenger()?;
            if now == checkpoint
                && now != (self.time_info.terminal / self.time_info.timestep) as u64
            {
                tracing::trace!(world_id = id, "sleeping at checkpoint");
                sleep(Duration::from_nanos(100));
                continue;
            }
            let gvt = self.gvt.load(Ordering::SeqCst);
            self.fossil_collect(gvt);
            if gvt + self.throttle_horizon < self.now() {
                tracing::trace!(world_id = id, gvt, local = now, "sleeping, throttled");
                sleep(Duration::from_nanos(100));
                continue;
            }
            let step = self.step();
            if let Err(AikaError::PastTerminal) = step {
                break;
            }
            step?;
        }
        self.finalize();
        tracing::debug!(world_id = id, "planet reached terminal time");
        Ok(())
    }

    /// Call every agent's `ThreadedAgent::finalize` once, at terminal time.
    fn finalize(&mut self) {
        for i in 0..self.agents.len() {
            self.agents[i].finalize(&mut self.context, i);
        }
    }

    /// Dispatch `ThreadedAgent::resume_branch` to every agent on this `Planet`, called
    /// by the clone director after this world has been assigned a branch to continue
    /// along (spec.md §4.6 "Divergence"), then schedule each agent's continuation one
    /// tick out (`agent_move(branch, timestamp+1)` per spec.md §4.6 step 4). Without
    /// this, a world synced to GVT by `handle_clone_order`'s rollback has no event left
    /// to dequeue — the branch mutation applies once and the walk stalls forever.
    pub fn resume_branch(&mut self, branch: u8) -> Result<(), AikaError> {
        let resume_at = self.now() + 1;
        for i in 0..self.agents.len() {
            self.agents[i].resume_branch(&mut self.context, i, branch);
            self.schedule(resume_at, i)?;
        }
        Ok(())
    }

    fn take_clone_order(&mut self) -> Option<CloneOrder> {
        let slot = self.context.clone_order_slot();
        let mut guard = slot.lock().unwrap();
        guard.take()
    }

    /// Carry out a clone order dispatched by the director: roll back to GVT, then
    /// either ship this world's agent states to the destination and resume along
    /// `first_choice` (source), or resume along `second_choice` once the source's
    /// shipped state arrives over the regular mail transport (destination)
    /// (spec.md §4.6 steps 1, 3, 4).
    fn handle_clone_order(&mut self, order: CloneOrder) -> Result<(), AikaError> {
        let gvt = self.gvt.load(Ordering::SeqCst);
        self.rollback(gvt)?;
        match order {
            CloneOrder::Source {
                peer_world,
                decision,
            } => {
                if let Some(peer) = peer_world {
                    for i in 0..self.agents.len() {
                        let bytes = self.agents[i].export_state();
                        self.context.send_state(i, &bytes, peer)?;
                    }
                    tracing::info!(
                        world_id = self.context.world_id,
                        destination = peer,
                        "clone source shipped state, resuming on first choice"
                    );
                } else {
                    tracing::debug!(
                        world_id = self.context.world_id,
                        "no clone destination, resuming on first choice alone"
                    );
                }
                self.resume_branch(decision.first_choice)?;
            }
            CloneOrder::Destination {
                peer_world,
                decision,
            } => {
                tracing::info!(
                    world_id = self.context.world_id,
                    source = peer_world,
                    "clone destination resuming on second choice"
                );
                self.resume_branch(decision.second_choice)?;
            }
        }
        Ok(())
    }
}
