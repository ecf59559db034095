use std::collections::BTreeMap;

use log::debug;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Gamma};

use crate::{
    Partition, PartitionEntry, Result, SimErr,
    partition::{DEV, TEST},
    seed::{seeded_rng, stream},
};

/// Splits a sample pool into non-IID client shards.
///
/// For every class the share of each client is drawn from a symmetric
/// `Dirichlet(alpha)`, sampled as normalized `Gamma(alpha, 1)` draws. Small
/// concentrations give skewed label distributions, large ones near IID shards.
#[derive(Debug, Clone)]
pub struct DirichletPartitioner {
    num_clients: usize,
    alpha: f64,
    seed: u64,
}

impl DirichletPartitioner {
    /// Returns a new `DirichletPartitioner`.
    ///
    /// # Errors
    /// Returns `SimErr::InvalidSetting` if there are no clients or `alpha` isn't
    /// a positive finite number.
    pub fn new(num_clients: usize, alpha: f64, seed: u64) -> Result<Self> {
        if num_clients == 0 {
            return Err(SimErr::InvalidSetting("the partition needs at least one client"));
        }

        if !(alpha.is_finite() && alpha > 0.) {
            return Err(SimErr::InvalidSetting("the dirichlet concentration must be positive"));
        }

        Ok(Self {
            num_clients,
            alpha,
            seed,
        })
    }

    /// Assigns every entry to exactly one client.
    ///
    /// Entries are grouped by their first class; multi-label entries without
    /// positives form a group of their own.
    pub fn partition(&self, entries: &[PartitionEntry]) -> Result<Vec<Vec<PartitionEntry>>> {
        let mut rng = seeded_rng(&[self.seed, stream::PARTITION]);
        let gamma = Gamma::new(self.alpha, 1.0)
            .map_err(|_| SimErr::InvalidSetting("the dirichlet concentration must be positive"))?;

        let mut groups: BTreeMap<Option<usize>, Vec<&PartitionEntry>> = BTreeMap::new();
        for entry in entries {
            groups.entry(entry.label.primary_class()).or_default().push(entry);
        }

        let mut clients = vec![Vec::new(); self.num_clients];

        for (class, mut members) in groups {
            members.shuffle(&mut rng);

            let draws: Vec<f64> = (0..self.num_clients).map(|_| gamma.sample(&mut rng)).collect();
            let total: f64 = draws.iter().sum();
            let uniform = 1. / self.num_clients as f64;

            let n = members.len();
            let mut start = 0;
            let mut cumulative = 0.;

            for (client, draw) in draws.iter().enumerate() {
                cumulative += if total > 0. { draw / total } else { uniform };

                let end = if client + 1 == self.num_clients {
                    n
                } else {
                    ((cumulative * n as f64).round() as usize).clamp(start, n)
                };

                clients[client].extend(members[start..end].iter().map(|&e| e.clone()));
                start = end;
            }

            debug!(class:? = class, samples = n; "distributed class over clients");
        }

        Ok(clients)
    }
}

/// Carves the last `dev_fraction` of a client's entries out as validation data.
pub fn split_train_dev(
    mut entries: Vec<PartitionEntry>,
    dev_fraction: f64,
) -> (Vec<PartitionEntry>, Vec<PartitionEntry>) {
    let fraction = dev_fraction.clamp(0., 1.);
    let dev_len = ((entries.len() as f64 * fraction).round() as usize).min(entries.len());
    let dev = entries.split_off(entries.len() - dev_len);
    (entries, dev)
}

/// Builds a fold's partition: client `i` gets id `"i"`, the dev split pools
/// the validation part of every client and `test` is kept as is.
pub fn assemble_partition(
    shards: Vec<Vec<PartitionEntry>>,
    dev_fraction: f64,
    test: Vec<PartitionEntry>,
) -> Result<Partition> {
    let mut partition = Partition::new();
    let mut dev = Vec::new();

    for (idx, shard) in shards.into_iter().enumerate() {
        let (train, client_dev) = split_train_dev(shard, dev_fraction);
        dev.extend(client_dev);
        partition.insert(idx.to_string(), train)?;
    }

    partition.insert(DEV, dev)?;
    partition.insert(TEST, test)?;
    Ok(partition)
}

#[cfg(test)]
mod tests {
    use ml_core::Target;

    use super::*;

    fn pool(n: usize, classes: usize) -> Vec<PartitionEntry> {
        (0..n)
            .map(|i| PartitionEntry::new(format!("s{i}"), Target::Class(i % classes)))
            .collect()
    }

    #[test]
    fn every_entry_assigned_once() {
        let partitioner = DirichletPartitioner::new(5, 0.5, 8).unwrap();
        let entries = pool(200, 4);

        let shards = partitioner.partition(&entries).unwrap();
        assert_eq!(shards.len(), 5);

        let mut keys: Vec<String> = shards.iter().flatten().map(|e| e.key.clone()).collect();
        keys.sort();
        let mut expected: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn same_seed_same_shards() {
        let entries = pool(100, 3);
        let a = DirichletPartitioner::new(4, 0.1, 3).unwrap().partition(&entries).unwrap();
        let b = DirichletPartitioner::new(4, 0.1, 3).unwrap().partition(&entries).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_concentration() {
        assert!(DirichletPartitioner::new(3, 0., 0).is_err());
        assert!(DirichletPartitioner::new(0, 1., 0).is_err());
    }

    #[test]
    fn dev_split_takes_the_tail() {
        let (train, dev) = split_train_dev(pool(10, 2), 0.2);

        assert_eq!(train.len(), 8);
        assert_eq!(dev.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(), ["s8", "s9"]);
    }

    #[test]
    fn assembled_partition_has_eval_splits() {
        let partition = assemble_partition(vec![pool(10, 2), pool(5, 2)], 0.2, pool(3, 2)).unwrap();

        assert_eq!(partition.training_client_ids(), ["0", "1"]);
        assert_eq!(partition.get("0").map(<[_]>::len), Some(8));
        assert_eq!(partition.get("1").map(<[_]>::len), Some(4));
        assert_eq!(partition.dev().map(<[_]>::len), Some(3));
        assert_eq!(partition.test().map(<[_]>::len), Some(3));
    }
}
