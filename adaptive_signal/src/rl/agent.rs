// src/rl/agent.rs
//
// Tabular Q-learning agent.
//
// The agent owns hyperparameters, the exploration schedule and its RNG; the
// table is passed in explicitly so one table can be shared between training
// and inference without aliasing.
//
//   Q(s,a) <- Q(s,a) + α [ r + γ max_a' Q(s',a') - Q(s,a) ]
//
// Episodes end by truncation, not by a terminal state, so the update always
// bootstraps from s'.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::AgentConfig;
use crate::discretizer::StateKey;
use crate::error::{ConfigError, QTableError};
use crate::types::Action;

use super::q_table::QTable;

#[derive(Debug, Clone)]
pub struct QLearningAgent {
    alpha: f64,
    gamma: f64,
    epsilon: f64,
    epsilon_floor: f64,
    epsilon_decay: f64,
    rng: ChaCha8Rng,
}

impl QLearningAgent {
    pub fn new(config: &AgentConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            alpha: config.alpha,
            gamma: config.gamma,
            epsilon: config.epsilon_start,
            epsilon_floor: config.epsilon_floor,
            epsilon_decay: config.epsilon_decay,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Override ε (e.g. when resuming training). Clamped to [floor, 1].
    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon.clamp(self.epsilon_floor, 1.0);
    }

    /// Reseed the exploration RNG for a new episode.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// ε-greedy over the actions valid in `key.phase`.
    pub fn select_action(&mut self, table: &QTable, key: &StateKey) -> Action {
        let valid = Action::valid_for(key.phase);
        if valid.len() == 1 {
            return valid[0];
        }
        if self.rng.gen::<f64>() < self.epsilon {
            valid[self.rng.gen_range(0..valid.len())]
        } else {
            table.greedy_action(key)
        }
    }

    /// Apply one TD update and return the TD error.
    pub fn update(
        &self,
        table: &mut QTable,
        state: &StateKey,
        action: Action,
        reward: f64,
        next_state: &StateKey,
    ) -> Result<f64, QTableError> {
        let current = table.get(state, action);
        let target = reward + self.gamma * table.max_value(next_state);
        let td_error = target - current;
        table.set(state, action, current + self.alpha * td_error)?;
        Ok(td_error)
    }

    /// ε <- max(floor, ε · decay). Returns the new ε.
    pub fn decay_epsilon(&mut self) -> f64 {
        self.epsilon = (self.epsilon * self.epsilon_decay).max(self.epsilon_floor);
        self.epsilon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretizer::StateLayout;
    use crate::types::Phase;

    fn agent_config() -> AgentConfig {
        AgentConfig {
            alpha: 0.5,
            gamma: 0.9,
            epsilon_start: 1.0,
            epsilon_floor: 0.05,
            epsilon_decay: 0.5,
        }
    }

    fn table() -> QTable {
        QTable::new(StateLayout {
            queue_buckets: 6,
            elapsed_buckets: 4,
        })
    }

    fn key(q: u8, phase: Phase) -> StateKey {
        StateKey {
            queues: [q; 4],
            phase,
            elapsed: 0,
        }
    }

    #[test]
    fn update_moves_toward_target() {
        let agent = QLearningAgent::new(&agent_config(), 1).unwrap();
        let mut t = table();
        let s = key(1, Phase::NsGreen);
        let s2 = key(2, Phase::NsGreen);
        t.set(&s2, Action::Switch, -2.0).unwrap();

        // target = -1 + 0.9 * max(0, -2) = -1; td = -1; Q = 0 + 0.5 * -1
        let td = agent.update(&mut t, &s, Action::Extend, -1.0, &s2).unwrap();
        assert!((td - (-1.0)).abs() < 1e-12);
        assert!((t.get(&s, Action::Extend) - (-0.5)).abs() < 1e-12);
        assert_eq!(t.get(&s, Action::Switch), 0.0);
    }

    #[test]
    fn update_bootstraps_over_valid_actions_only() {
        let agent = QLearningAgent::new(&agent_config(), 1).unwrap();
        let mut t = table();
        let s = key(1, Phase::NsGreen);
        let yellow = key(1, Phase::NsYellow);
        t.set(&yellow, Action::Extend, -10.0).unwrap();
        t.set(&yellow, Action::Switch, 100.0).unwrap();

        let td = agent.update(&mut t, &s, Action::Switch, 0.0, &yellow).unwrap();
        assert!((td - (-9.0)).abs() < 1e-12);
    }

    #[test]
    fn epsilon_decays_to_floor() {
        let mut agent = QLearningAgent::new(&agent_config(), 1).unwrap();
        let mut prev = agent.epsilon();
        for _ in 0..20 {
            let e = agent.decay_epsilon();
            assert!(e <= prev);
            assert!(e >= 0.05);
            prev = e;
        }
        assert_eq!(agent.epsilon(), 0.05);
    }

    #[test]
    fn greedy_when_epsilon_zero() {
        let mut cfg = agent_config();
        cfg.epsilon_start = 0.0;
        cfg.epsilon_floor = 0.0;
        let mut agent = QLearningAgent::new(&cfg, 9).unwrap();
        let mut t = table();
        let s = key(3, Phase::EwGreen);
        t.set(&s, Action::Switch, 1.0).unwrap();
        for _ in 0..50 {
            assert_eq!(agent.select_action(&t, &s), Action::Switch);
        }
    }

    #[test]
    fn yellow_always_extends() {
        let mut agent = QLearningAgent::new(&agent_config(), 3).unwrap();
        let t = table();
        for _ in 0..50 {
            assert_eq!(agent.select_action(&t, &key(0, Phase::EwYellow)), Action::Extend);
        }
    }

    #[test]
    fn full_exploration_tries_both_actions() {
        let mut agent = QLearningAgent::new(&agent_config(), 5).unwrap();
        let t = table();
        let s = key(0, Phase::NsGreen);
        let picks: Vec<Action> = (0..100).map(|_| agent.select_action(&t, &s)).collect();
        assert!(picks.contains(&Action::Extend));
        assert!(picks.contains(&Action::Switch));
    }

    #[test]
    fn same_seed_same_choices() {
        let t = table();
        let s = key(0, Phase::NsGreen);
        let mut a = QLearningAgent::new(&agent_config(), 77).unwrap();
        let mut b = QLearningAgent::new(&agent_config(), 77).unwrap();
        for _ in 0..100 {
            assert_eq!(a.select_action(&t, &s), b.select_action(&t, &s));
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let mut cfg = agent_config();
        cfg.alpha = 1.5;
        assert!(QLearningAgent::new(&cfg, 0).is_err());
    }
}
