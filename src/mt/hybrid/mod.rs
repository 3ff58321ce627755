//! The optimistic time-warp engine: `Galaxy` drives GVT reduction across worker
//! threads, each running a `Planet` scheduler. `HybridEngine` owns both halves and
//! the thread lifecycle; `director` hosts the clone/branch protocol that forks a
//! `Planet`'s state across two processing elements at a GVT hook.
use std::thread;

use bytemuck::{Pod, Zeroable};

use crate::{
    agents::ThreadedAgent,
    mt::hybrid::{config::HybridConfig, galaxy::Galaxy, planet::Planet},
    AikaError,
};

pub mod config;
pub mod director;
pub mod galaxy;
pub mod planet;

/// Owns a `Galaxy` and its `Planet`s before they are handed off to worker threads.
/// Agents are spawned here; once [`Self::run`] is called the engine is consumed.
pub struct HybridEngine<
    const INTER_SLOTS: usize,
    const CLOCK_SLOTS: usize,
    const CLOCK_HEIGHT: usize,
    MessageType: Pod + Zeroable + Clone,
> {
    pub galaxy: Galaxy<INTER_SLOTS, CLOCK_SLOTS, CLOCK_HEIGHT, MessageType>,
    pub planets: Vec<Planet<INTER_SLOTS, CLOCK_SLOTS, CLOCK_HEIGHT, MessageType>>,
    pub config: HybridConfig,
}

impl<
        const INTER_SLOTS: usize,
        const CLOCK_SLOTS: usize,
        const CLOCK_HEIGHT: usize,
        MessageType: Pod + Zeroable + Clone + Send + 'static,
    > HybridEngine<INTER_SLOTS, CLOCK_SLOTS, CLOCK_HEIGHT, MessageType>
{
    /// Build a `Galaxy` and one preconfigured `Planet` per world from a validated
    /// `HybridConfig`.
    pub fn create(config: HybridConfig) -> Result<Self, AikaError> {
        config.validate()?;
        let mut galaxy = Galaxy::new(
            config.number_of_worlds,
            config.throttle_horizon,
            config.checkpoint_frequency,
            config.terminal,
            config.timestep,
            config.gvt_interval,
        )?;
        let mut planets = Vec::with_capacity(config.number_of_worlds);
        for world_id in 0..config.number_of_worlds {
            let world_consts = config.world_config(world_id)?;
            let registry = galaxy.spawn_world()?;
            let planet = Planet::from_config_with_lookahead(
                world_consts,
                config.terminal,
                config.timestep,
                config.throttle_horizon,
                config.lookahead,
                registry,
            )?;
            planets.push(planet);
        }
        Ok(Self {
            galaxy,
            planets,
            config,
        })
    }

    /// Spawn an agent on the least-loaded `Planet`, round-robin over remaining
    /// preconfigured agent-state capacity first and falling back to a freshly
    /// allocated journal once that capacity is exhausted (spec.md §4.3 lp_registry:
    /// "round-robins across PEs" autobalance policy).
    pub fn spawn_agent_autobalance(
        &mut self,
        agent: Box<dyn ThreadedAgent<INTER_SLOTS, MessageType>>,
    ) -> Result<(usize, usize), AikaError> {
        if self.planets.is_empty() {
            return Err(AikaError::NotAllAgentsRegistered);
        }
        let world_id = self
            .planets
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| p.agents.len())
            .map(|(i, _)| i)
            .unwrap();
        let agent_id = self.spawn_agent_on(world_id, agent)?;
        Ok((world_id, agent_id))
    }

    /// Spawn an agent on a specific world.
    pub fn spawn_agent_on(
        &mut self,
        world_id: usize,
        agent: Box<dyn ThreadedAgent<INTER_SLOTS, MessageType>>,
    ) -> Result<usize, AikaError> {
        let planet = self
            .planets
            .get_mut(world_id)
            .ok_or(AikaError::InvalidWorldId(world_id))?;
        let agent_id = if planet.agents.len() < planet.context.agent_states.len() {
            planet.spawn_agent_preconfigured(agent)
        } else {
            planet.spawn_agent(agent, self.config.anti_message_asize)
        };
        Ok(agent_id)
    }

    /// Schedule an agent's first event. Thin forwarding wrapper so callers don't
    /// need to reach into `self.planets` directly.
    pub fn schedule(&mut self, world_id: usize, agent: usize, time: u64) -> Result<(), AikaError> {
        let planet = self
            .planets
            .get_mut(world_id)
            .ok_or(AikaError::InvalidWorldId(world_id))?;
        planet.schedule(time, agent)
    }

    /// Register the clone/branch director's GVT hook, forwarded to the `Galaxy`.
    pub fn register_gvt_hook(&mut self, hook: galaxy::GvtHook) {
        self.galaxy.register_gvt_hook(hook);
    }

    /// Run every `Planet` on its own worker thread and the `Galaxy`'s GVT daemon on
    /// the calling thread until all worlds reach terminal time, grounded in
    /// `mt::optimistic::TimeWarp::run`'s thread-per-LP-plus-GVT-thread layout.
    pub fn run(mut self) -> Result<Self, AikaError> {
        let mut handles = Vec::with_capacity(self.planets.len());
        for mut planet in std::mem::take(&mut self.planets) {
            let handle = thread::spawn(move || -> Result<_, AikaError> {
                planet.run()?;
                Ok(planet)
            });
            handles.push(handle);
        }

        let galaxy_result = self.galaxy.gvt_daemon();

        let mut planets = Vec::with_capacity(handles.len());
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(planet)) => planets.push(planet),
                Ok(Err(err)) => {
                    tracing::error!(world_id = i, error = %err, "planet terminated with error");
                    return Err(err);
                }
                Err(_) => {
                    tracing::error!(world_id = i, "planet thread panicked");
                    return Err(AikaError::ThreadPanic);
                }
            }
        }
        self.planets = planets;
        galaxy_result?;
        Ok(self)
    }
}
