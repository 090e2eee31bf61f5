//! The fixed set of configured agents

use crate::agent::Agent;
use crate::persona::{Persona, PersonaDeck};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{info, warn};

/// All agents, plus persona assignment across them
#[derive(Debug)]
pub struct AgentPool {
    agents: Vec<Arc<Agent>>,
    deck: PersonaDeck,
}

impl AgentPool {
    /// Create a pool; personas are dealt from `personas` as agents become ready
    pub fn new(agents: Vec<Arc<Agent>>, personas: &[Arc<Persona>]) -> Self {
        Self {
            agents,
            deck: PersonaDeck::new(personas),
        }
    }

    /// Every agent, by pool index
    pub fn agents(&self) -> &[Arc<Agent>] {
        &self.agents
    }

    /// Agent at `id`
    pub fn get(&self, id: usize) -> Option<&Arc<Agent>> {
        self.agents.get(id)
    }

    /// Number of agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the pool has no agents
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// The agent that greets the monitored user when they join voice
    pub fn primary(&self) -> Option<Arc<Agent>> {
        self.agents.first().cloned()
    }

    /// Whether any agent is playing audio
    ///
    /// Best-effort: two agents checking at the same moment can both see
    /// `false` and start together.
    pub fn any_speaking(&self) -> bool {
        self.agents.iter().any(|a| a.is_speaking())
    }

    /// Agents holding a live voice connection
    pub fn connected(&self) -> Vec<Arc<Agent>> {
        self.agents
            .iter()
            .filter(|a| a.is_connected())
            .cloned()
            .collect()
    }

    /// A uniformly random agent
    pub fn choose_random(&self) -> Option<Arc<Agent>> {
        self.agents.choose(&mut rand::thread_rng()).cloned()
    }

    /// Give `agent` a persona on its first ready event
    ///
    /// Personas already assigned to other agents are avoided until every
    /// persona is in use. An agent that already has a persona keeps it.
    pub fn assign_persona(&self, agent: &Agent) -> Option<Arc<Persona>> {
        if let Some(existing) = agent.persona() {
            return Some(existing);
        }
        let persona = self.deck.draw()?;
        agent.set_persona(persona.clone());
        Some(persona)
    }

    /// Disconnect every connected agent. Returns how many were connected.
    pub async fn disconnect_all(&self) -> usize {
        let mut closed = 0;
        for agent in &self.agents {
            match agent.leave().await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => warn!(agent_id = agent.id(), error = %e, "Error disconnecting agent"),
            }
        }
        if closed > 0 {
            info!(disconnected = closed, "Disconnected agents from voice");
        }
        closed
    }

    /// Return every persona's emotion to neutral
    pub fn reset_emotions(&self) {
        for agent in &self.agents {
            agent.personas().reset_emotions();
        }
    }

    /// Cancel every agent's background work and leave voice
    pub async fn shutdown(&self) {
        for agent in &self.agents {
            agent.shutdown().await;
        }
    }
}
