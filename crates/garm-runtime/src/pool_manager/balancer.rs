//! Pool selection policy for a queued workflow job matching more than one
//! pool's labels (§4.2 "Pool balancer policy").

use std::collections::{BTreeSet, HashMap};

use garm_core::domain::{Pool, PoolBalancerPolicy};
use uuid::Uuid;

/// Tracks least-recently-used pool selection for round-robin/pack tiebreaks.
/// One instance lives per manager, so the counter is scoped to one entity.
#[derive(Debug, Default)]
pub struct Balancer {
    use_counter: HashMap<Uuid, u64>,
    tick: u64,
}

impl Balancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks the pool that should receive the next runner for a job
    /// requesting `labels`, among pools whose tags are a subset of those
    /// labels. Returns `None` if no pool matches, or if `policy` is `None`
    /// and more than one pool matches (job recorded as unrouted, §4.2).
    pub fn select<'a>(
        &mut self,
        policy: PoolBalancerPolicy,
        pools: &'a [Pool],
        labels: &BTreeSet<String>,
        busy_or_idle: &HashMap<Uuid, u32>,
    ) -> Option<&'a Pool> {
        let candidates: Vec<&Pool> = pools.iter().filter(|p| p.enabled && p.matches_labels(labels)).collect();

        let chosen = match policy {
            PoolBalancerPolicy::None => {
                if candidates.len() == 1 {
                    Some(candidates[0])
                } else {
                    None
                }
            }
            PoolBalancerPolicy::RoundRobin => self.pick_by(&candidates, busy_or_idle, true),
            PoolBalancerPolicy::Pack => self.pick_by(&candidates, busy_or_idle, false),
        };

        if let Some(pool) = chosen {
            self.tick += 1;
            self.use_counter.insert(pool.id, self.tick);
        }
        chosen
    }

    /// `largest_room = true` implements round-robin (prefer the pool with
    /// the most spare capacity); `false` implements pack (prefer the
    /// smallest non-zero spare capacity). Ties break on least-recently-used.
    fn pick_by<'a>(
        &self,
        candidates: &[&'a Pool],
        busy_or_idle: &HashMap<Uuid, u32>,
        largest_room: bool,
    ) -> Option<&'a Pool> {
        let room = |p: &Pool| p.max_runners.saturating_sub(*busy_or_idle.get(&p.id).unwrap_or(&0));

        let mut scored: Vec<&Pool> = if largest_room {
            candidates.to_vec()
        } else {
            candidates.iter().copied().filter(|p| room(p) > 0).collect()
        };
        if scored.is_empty() {
            return None;
        }

        scored.sort_by(|a, b| {
            let ra = room(a);
            let rb = room(b);
            let primary = if largest_room { rb.cmp(&ra) } else { ra.cmp(&rb) };
            primary.then_with(|| {
                let la = self.use_counter.get(&a.id).copied().unwrap_or(0);
                let lb = self.use_counter.get(&b.id).copied().unwrap_or(0);
                la.cmp(&lb)
            })
        });
        scored.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use garm_core::domain::{OsArch, OsType};

    fn pool(tags: &[&str], max: u32) -> Pool {
        let now = Utc::now();
        Pool {
            id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            provider_name: "mock".into(),
            image: "ubuntu".into(),
            flavor: "small".into(),
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            tags: tags.iter().map(|s| s.to_string()).collect(),
            min_idle_runners: 0,
            max_runners: max,
            runner_bootstrap_timeout_secs: 600,
            template_id: None,
            extra_spec: serde_json::json!({}),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn round_robin_prefers_most_spare_capacity() {
        let mut balancer = Balancer::new();
        let a = pool(&["linux"], 4);
        let b = pool(&["linux"], 10);
        let pools = vec![a.clone(), b.clone()];
        let labels: BTreeSet<String> = ["linux".into()].into();
        let busy = HashMap::from([(a.id, 2), (b.id, 2)]);

        let chosen = balancer.select(PoolBalancerPolicy::RoundRobin, &pools, &labels, &busy).unwrap();
        assert_eq!(chosen.id, b.id);
    }

    #[test]
    fn pack_prefers_smallest_nonzero_room() {
        let mut balancer = Balancer::new();
        let a = pool(&["linux"], 4);
        let b = pool(&["linux"], 10);
        let pools = vec![a.clone(), b.clone()];
        let labels: BTreeSet<String> = ["linux".into()].into();
        let busy = HashMap::from([(a.id, 2), (b.id, 2)]);

        let chosen = balancer.select(PoolBalancerPolicy::Pack, &pools, &labels, &busy).unwrap();
        assert_eq!(chosen.id, a.id);
    }

    #[test]
    fn none_policy_requires_exactly_one_match() {
        let mut balancer = Balancer::new();
        let a = pool(&["linux"], 4);
        let b = pool(&["linux"], 10);
        let pools = vec![a, b];
        let labels: BTreeSet<String> = ["linux".into()].into();
        assert!(balancer.select(PoolBalancerPolicy::None, &pools, &labels, &HashMap::new()).is_none());
    }

    #[test]
    fn tiebreak_uses_least_recently_used() {
        let mut balancer = Balancer::new();
        let a = pool(&["linux"], 4);
        let b = pool(&["linux"], 4);
        let pools = vec![a.clone(), b.clone()];
        let labels: BTreeSet<String> = ["linux".into()].into();

        let first = balancer.select(PoolBalancerPolicy::RoundRobin, &pools, &labels, &HashMap::new()).unwrap().id;
        let second = balancer.select(PoolBalancerPolicy::RoundRobin, &pools, &labels, &HashMap::new()).unwrap().id;
        assert_ne!(first, second);
    }
}
