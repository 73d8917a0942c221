// Contribution ledger: one live entry per (agent, domain) and the global map
// maintained incrementally from them. global[d] == Σ entries[*][d] after every call.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::DomainMetrics;

#[derive(Debug, Clone, Default)]
pub struct ContributionLedger {
    entries: HashMap<String, BTreeMap<String, DomainMetrics>>,
    global: BTreeMap<String, DomainMetrics>,
}

impl ContributionLedger {
    /// Atomically replaces every contribution of `agent_id`: old entries are subtracted
    /// from the global map (clamped), new ones added. Domains new for this agent skip
    /// the subtraction. Returns the number of domains touched.
    pub fn replace_agent(
        &mut self,
        agent_id: &str,
        contributions: BTreeMap<String, DomainMetrics>,
    ) -> usize {
        let previous = self.entries.remove(agent_id).unwrap_or_default();
        let touched: BTreeSet<&String> = previous.keys().chain(contributions.keys()).collect();
        for domain in &touched {
            self.apply(domain, previous.get(*domain), contributions.get(*domain));
        }
        let n = touched.len();
        if !contributions.is_empty() {
            self.entries.insert(agent_id.to_string(), contributions);
        }
        n
    }

    /// Subtracts every contribution of `agent_id` and forgets the agent.
    /// Returns the domains that disappeared from the global map.
    pub fn remove_agent(&mut self, agent_id: &str) -> Vec<String> {
        let Some(previous) = self.entries.remove(agent_id) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        for (domain, old) in &previous {
            self.apply(domain, Some(old), None);
            if !self.global.contains_key(domain) {
                removed.push(domain.clone());
            }
        }
        removed
    }

    fn apply(&mut self, domain: &str, old: Option<&DomainMetrics>, new: Option<&DomainMetrics>) {
        if old.is_none() && new.is_none() {
            return;
        }
        if new.is_none() && !self.global.contains_key(domain) {
            return;
        }
        let entry = self
            .global
            .entry(domain.to_string())
            .or_insert_with(|| DomainMetrics::new(domain));
        if let Some(old) = old {
            entry.subtract(old);
        }
        if let Some(new) = new {
            entry.merge(new);
        }
        entry.domain = domain.to_string();
        if entry.is_zero() {
            self.global.remove(domain);
        }
    }

    pub fn global(&self) -> &BTreeMap<String, DomainMetrics> {
        &self.global
    }

    pub fn get(&self, domain: &str) -> Option<&DomainMetrics> {
        self.global.get(domain)
    }

    pub fn entries(&self) -> &HashMap<String, BTreeMap<String, DomainMetrics>> {
        &self.entries
    }

    /// Sums every ledger entry from scratch, dropping all-zero domains like the
    /// incremental path does. Equal to `global()` on counters and sub-maps.
    pub fn resum(&self) -> BTreeMap<String, DomainMetrics> {
        let mut out: BTreeMap<String, DomainMetrics> = BTreeMap::new();
        for contributions in self.entries.values() {
            for (domain, stats) in contributions {
                out.entry(domain.clone())
                    .or_insert_with(|| DomainMetrics::new(domain.clone()))
                    .merge(stats);
            }
        }
        out.retain(|_, m| !m.is_zero());
        out
    }
}
