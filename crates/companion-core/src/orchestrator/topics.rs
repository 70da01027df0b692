//! Weighted topic selection for unprompted chit-chat.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use companion_types::character::Topic;
use companion_types::relationship::Affection;
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

/// Remembers when each topic was last used.
#[derive(Debug, Default)]
pub struct TopicPicker {
    last_used: HashMap<String, Instant>,
}

impl TopicPicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick among topics whose affection gate is met and whose cooldown has
    /// elapsed, weighted by `weight`. The chosen topic starts its cooldown.
    pub fn pick<'a, R: Rng + ?Sized>(
        &mut self,
        topics: &'a [Topic],
        affection: Affection,
        now: Instant,
        rng: &mut R,
    ) -> Option<&'a Topic> {
        let eligible: Vec<&Topic> = topics
            .iter()
            .filter(|t| t.weight > 0 && affection.value() >= t.min_affection)
            .filter(|t| match self.last_used.get(&t.id) {
                Some(at) => now.saturating_duration_since(*at) >= Duration::from_secs(t.cooldown_secs),
                None => true,
            })
            .collect();

        let dist = WeightedIndex::new(eligible.iter().map(|t| t.weight)).ok()?;
        let topic = eligible[dist.sample(rng)];
        self.last_used.insert(topic.id.clone(), now);
        Some(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn topics() -> Vec<Topic> {
        vec![
            Topic::new("music", "music").with_cooldown_secs(60),
            Topic::new("secret", "a secret").with_min_affection(70),
        ]
    }

    #[test]
    fn affection_gate_filters_topics() {
        let mut picker = TopicPicker::new();
        let mut rng = StdRng::seed_from_u64(7);
        let topics = topics();
        for _ in 0..5 {
            let mut fresh = TopicPicker::new();
            let picked = fresh.pick(&topics, Affection::new(50), Instant::now(), &mut rng);
            assert_eq!(picked.map(|t| t.id.as_str()), Some("music"));
        }
        assert!(picker.pick(&topics, Affection::new(90), Instant::now(), &mut rng).is_some());
    }

    #[test]
    fn cooldown_blocks_reuse_until_elapsed() {
        let mut picker = TopicPicker::new();
        let mut rng = StdRng::seed_from_u64(1);
        let topics = topics();
        let t0 = Instant::now();

        assert!(picker.pick(&topics, Affection::new(10), t0, &mut rng).is_some());
        assert!(picker.pick(&topics, Affection::new(10), t0 + Duration::from_secs(30), &mut rng).is_none());
        assert!(picker.pick(&topics, Affection::new(10), t0 + Duration::from_secs(61), &mut rng).is_some());
    }

    #[test]
    fn zero_weight_is_never_picked() {
        let mut picker = TopicPicker::new();
        let mut rng = StdRng::seed_from_u64(3);
        let topics = vec![Topic::new("never", "x").with_weight(0)];
        assert!(picker.pick(&topics, Affection::new(100), Instant::now(), &mut rng).is_none());
    }

    #[test]
    fn weights_bias_the_choice() {
        let mut rng = StdRng::seed_from_u64(42);
        let topics = vec![
            Topic::new("rare", "r").with_weight(1).with_cooldown_secs(0),
            Topic::new("common", "c").with_weight(9).with_cooldown_secs(0),
        ];
        let mut picker = TopicPicker::new();
        let now = Instant::now();
        let common = (0..1000)
            .filter(|_| picker.pick(&topics, Affection::new(50), now, &mut rng).unwrap().id == "common")
            .count();
        assert!(common > 800, "common picked {common} times");
    }
}
