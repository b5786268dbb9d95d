// Weighted queue rotation (smooth weighted round-robin)
use crate::domain::{QueueConfig, QueueName};
use crate::error::{AppError, Result};

struct Slot {
    name: QueueName,
    weight: i64,
    current: i64,
}

/// Shared rotation cursor across all workers of a pool
///
/// Each call to [`WeightedRotation::next_order`] is one tick. Over
/// `sum(weights)` consecutive ticks every queue comes first exactly `weight`
/// times, and picks are interleaved rather than bunched, so a low-weight
/// queue waits at most about `sum(weights) / weight` ticks for its turn.
pub struct WeightedRotation {
    slots: Vec<Slot>,
    total_weight: i64,
}

impl WeightedRotation {
    /// Queues keep the given order; it breaks ties and defines fall-through
    pub fn new(queues: &[QueueConfig]) -> Result<Self> {
        if queues.is_empty() {
            return Err(AppError::Config("rotation needs at least one queue".into()));
        }
        if let Some(q) = queues.iter().find(|q| q.weight == 0) {
            return Err(AppError::Config(format!(
                "queue '{}' must have a positive weight",
                q.name
            )));
        }

        let slots: Vec<Slot> = queues
            .iter()
            .map(|q| Slot {
                name: q.name.clone(),
                weight: i64::from(q.weight),
                current: 0,
            })
            .collect();
        let total_weight = slots.iter().map(|s| s.weight).sum();

        Ok(Self {
            slots,
            total_weight,
        })
    }

    pub fn total_weight(&self) -> i64 {
        self.total_weight
    }

    /// Advance one tick and return the lease order: the selected queue
    /// first, then the others cyclically after it.
    pub fn next_order(&mut self) -> Vec<QueueName> {
        let mut selected = 0;
        for index in 0..self.slots.len() {
            self.slots[index].current += self.slots[index].weight;
            if self.slots[index].current > self.slots[selected].current {
                selected = index;
            }
        }
        self.slots[selected].current -= self.total_weight;

        let len = self.slots.len();
        (0..len)
            .map(|offset| self.slots[(selected + offset) % len].name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn rotation(weights: &[(&str, u32)]) -> WeightedRotation {
        let queues: Vec<QueueConfig> = weights
            .iter()
            .map(|(name, weight)| QueueConfig::new(*name, *weight))
            .collect();
        WeightedRotation::new(&queues).unwrap()
    }

    #[test]
    fn test_each_queue_first_weight_times_per_cycle() {
        let mut rotation = rotation(&[("critical", 6), ("default", 3), ("low", 2)]);
        assert_eq!(rotation.total_weight(), 11);

        for _cycle in 0..3 {
            let mut firsts: HashMap<String, u32> = HashMap::new();
            for _ in 0..11 {
                let order = rotation.next_order();
                *firsts.entry(order[0].clone()).or_default() += 1;
            }
            assert_eq!(firsts["critical"], 6);
            assert_eq!(firsts["default"], 3);
            assert_eq!(firsts["low"], 2);
        }
    }

    #[test]
    fn test_one_to_three_converges() {
        let mut rotation = rotation(&[("high", 3), ("low", 1)]);
        let mut low = 0;
        let ticks = 4_000;
        for _ in 0..ticks {
            if rotation.next_order()[0] == "low" {
                low += 1;
            }
        }
        assert_eq!(low, ticks / 4);
    }

    #[test]
    fn test_low_weight_never_starved() {
        let mut rotation = rotation(&[("high", 3), ("low", 1)]);
        let mut since_low = 0;
        for _ in 0..1_000 {
            if rotation.next_order()[0] == "low" {
                since_low = 0;
            } else {
                since_low += 1;
                assert!(since_low < 4, "low skipped for {} ticks", since_low);
            }
        }
    }

    #[test]
    fn test_order_contains_every_queue_once() {
        let mut rotation = rotation(&[("a", 5), ("b", 1), ("c", 1)]);
        for _ in 0..20 {
            let mut order = rotation.next_order();
            assert_eq!(order.len(), 3);
            order.sort();
            assert_eq!(order, vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn test_fall_through_is_cyclic() {
        let mut rotation = rotation(&[("a", 1), ("b", 1), ("c", 1)]);
        assert_eq!(rotation.next_order(), vec!["a", "b", "c"]);
        assert_eq!(rotation.next_order(), vec!["b", "c", "a"]);
        assert_eq!(rotation.next_order(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_invalid_queues_rejected() {
        assert!(WeightedRotation::new(&[]).is_err());
        assert!(WeightedRotation::new(&[QueueConfig::new("a", 0)]).is_err());
    }
}
