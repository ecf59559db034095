use rand::{SeedableRng, rngs::StdRng, seq::index};
use serde::{Deserialize, Serialize};

use crate::{Result, ServerErr};

/// The clients taking part in every round of a fold, drawn up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSampleSchedule {
    num_clients: usize,
    per_round: usize,
    rounds: Vec<Vec<usize>>,
}

impl ClientSampleSchedule {
    /// Returns a new `ClientSampleSchedule`.
    ///
    /// Every round draws `round(num_clients * sample_rate)` distinct client
    /// indices, independently of the other rounds.
    ///
    /// # Arguments
    /// * `num_clients` - The size of the training population.
    /// * `sample_rate` - The fraction of clients sampled per round.
    /// * `num_rounds` - The amount of rounds to schedule.
    /// * `seed` - The seed of the draw.
    ///
    /// # Errors
    /// Returns `ServerErr::InvalidSampleRate` unless `0 < sample_rate <= 1`.
    pub fn new(num_clients: usize, sample_rate: f64, num_rounds: usize, seed: u64) -> Result<Self> {
        if !(sample_rate > 0. && sample_rate <= 1.) {
            return Err(ServerErr::InvalidSampleRate(sample_rate));
        }

        let per_round = ((num_clients as f64 * sample_rate).round() as usize).min(num_clients);
        let mut rng = StdRng::seed_from_u64(seed);

        let rounds = (0..num_rounds)
            .map(|_| {
                let mut clients = index::sample(&mut rng, num_clients, per_round).into_vec();
                clients.sort_unstable();
                clients
            })
            .collect();

        Ok(Self {
            num_clients,
            per_round,
            rounds,
        })
    }

    pub fn num_clients(&self) -> usize {
        self.num_clients
    }

    pub fn per_round(&self) -> usize {
        self.per_round
    }

    pub fn num_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Returns the sorted client indices of `round`.
    ///
    /// # Errors
    /// Returns `ServerErr::RoundOutOfSchedule` for rounds that weren't drawn.
    pub fn clients(&self, round: usize) -> Result<&[usize]> {
        self.rounds
            .get(round)
            .map(Vec::as_slice)
            .ok_or(ServerErr::RoundOutOfSchedule {
                round,
                rounds: self.rounds.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_schedule() {
        let a = ClientSampleSchedule::new(50, 0.1, 20, 8).unwrap();
        let b = ClientSampleSchedule::new(50, 0.1, 20, 8).unwrap();
        let c = ClientSampleSchedule::new(50, 0.1, 20, 9).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rounds_are_sampled_without_replacement() {
        let schedule = ClientSampleSchedule::new(10, 0.25, 30, 1).unwrap();
        assert_eq!(schedule.per_round(), 3);

        for round in 0..30 {
            let clients = schedule.clients(round).unwrap();
            assert_eq!(clients.len(), 3);
            assert!(clients.windows(2).all(|w| w[0] < w[1]));
            assert!(clients.iter().all(|&c| c < 10));
        }

        assert!(schedule.clients(30).is_err());
    }

    #[test]
    fn full_participation() {
        let schedule = ClientSampleSchedule::new(4, 1., 2, 0).unwrap();
        assert_eq!(schedule.clients(1).unwrap(), [0, 1, 2, 3]);
    }

    #[test]
    fn invalid_rates() {
        for rate in [0., -0.5, 1.5, f64::NAN] {
            assert!(ClientSampleSchedule::new(10, rate, 1, 0).is_err());
        }
    }
}
