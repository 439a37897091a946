//! Dependency resolution over module sets
//!
//! Pure computations: closure checks over an enabled set, and plan
//! simulation that expands a user-supplied install plan until the
//! resulting enabled set is self-consistent. Failures are collected in a
//! structured form and stringified once at the boundary, where the empty
//! string still means "no failures".

use std::collections::{HashMap, HashSet};

use modgate_common::{
    latest_of, GatewayError, GatewayResult, InterfaceType, InterfaceVersion, ModuleAction,
    ModuleDescriptor, ModuleId, TenantModuleDescriptor,
};

/// One unsatisfied interface requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmetRequirement {
    /// Module declaring the requirement
    pub module: String,
    /// Required interface id
    pub interface: String,
    /// Minimum acceptable version
    pub version: String,
}

/// One interface provided by more than one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConflict {
    /// Interface id
    pub interface: String,
    /// Competing providers
    pub providers: Vec<String>,
}

/// Structured closure-check outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyFailure {
    /// Unsatisfied requirements, first per module
    pub unmet: Vec<UnmetRequirement>,
    /// Multiply-provided non-multiple interfaces
    pub conflicting: Vec<InterfaceConflict>,
}

impl DependencyFailure {
    /// Whether the check passed
    pub fn is_empty(&self) -> bool {
        self.unmet.is_empty() && self.conflicting.is_empty()
    }

    /// Human-readable summary; empty when the check passed
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        for u in &self.unmet {
            lines.push(format!(
                "missing dependency for {} {} (required by {})",
                u.interface, u.version, u.module
            ));
        }
        for c in &self.conflicting {
            lines.push(format!(
                "interface {} is provided by multiple modules: {}",
                c.interface,
                c.providers.join(", ")
            ));
        }
        lines.join("; ")
    }
}

fn version_satisfies(provided: &str, required: &str) -> bool {
    match (
        InterfaceVersion::parse(provided),
        InterfaceVersion::parse(required),
    ) {
        (Ok(p), Ok(r)) => p.satisfies(&r),
        _ => provided == required,
    }
}

fn set_provides(
    mods: &HashMap<String, ModuleDescriptor>,
    interface: &str,
    version: &str,
) -> bool {
    mods.values().any(|md| module_provides(md, interface, version))
}

fn module_provides(md: &ModuleDescriptor, interface: &str, version: &str) -> bool {
    md.provides
        .iter()
        .any(|p| p.id == interface && version_satisfies(&p.version, version))
}

fn set_provides_id(mods: &HashMap<String, ModuleDescriptor>, interface: &str) -> bool {
    mods.values()
        .any(|md| md.provides.iter().any(|p| p.id == interface))
}

/// First requirement violation of `md` against `mods`, if any
///
/// Required interfaces must be provided at a satisfying version; optional
/// interfaces only need a satisfying version when some provider for the
/// id is present at all.
fn first_violation(
    md: &ModuleDescriptor,
    mods: &HashMap<String, ModuleDescriptor>,
) -> Option<UnmetRequirement> {
    for req in &md.requires {
        if !set_provides(mods, &req.id, &req.version) {
            return Some(UnmetRequirement {
                module: md.id.clone(),
                interface: req.id.clone(),
                version: req.version.clone(),
            });
        }
    }
    for opt in &md.optional {
        if set_provides_id(mods, &opt.id) && !set_provides(mods, &opt.id, &opt.version) {
            return Some(UnmetRequirement {
                module: md.id.clone(),
                interface: opt.id.clone(),
                version: opt.version.clone(),
            });
        }
    }
    None
}

/// Collect every module's first unsatisfied requirement
pub fn dependency_failures(mods: &HashMap<String, ModuleDescriptor>) -> DependencyFailure {
    let mut ids: Vec<&String> = mods.keys().collect();
    ids.sort();
    let mut failure = DependencyFailure::default();
    for id in ids {
        if let Some(unmet) = first_violation(&mods[id], mods) {
            failure.unmet.push(unmet);
        }
    }
    failure
}

/// Collect non-multiple proxy interfaces provided more than once
pub fn conflict_failures(mods: &HashMap<String, ModuleDescriptor>) -> DependencyFailure {
    let mut ids: Vec<&String> = mods.keys().collect();
    ids.sort();
    let mut providers: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in &ids {
        for p in &mods[*id].provides {
            if p.is_type(InterfaceType::Proxy) {
                providers.entry(&p.id).or_default().push(id);
            }
        }
    }
    let mut failure = DependencyFailure::default();
    let mut ifaces: Vec<&&str> = providers.keys().collect();
    ifaces.sort();
    for iface in ifaces {
        let mods_for = &providers[*iface];
        if mods_for.len() > 1 {
            failure.conflicting.push(InterfaceConflict {
                interface: iface.to_string(),
                providers: mods_for.iter().map(|s| s.to_string()).collect(),
            });
        }
    }
    failure
}

/// Empty string when every requirement in `mods` is satisfied within `mods`
pub fn check_all_dependencies(mods: &HashMap<String, ModuleDescriptor>) -> String {
    dependency_failures(mods).render()
}

/// Empty string when no non-multiple interface has two providers in `mods`
pub fn check_all_conflicts(mods: &HashMap<String, ModuleDescriptor>) -> String {
    conflict_failures(mods).render()
}

/// Per-item bookkeeping during simulation, for attribution and rollback
#[derive(Debug, Default, Clone)]
struct ItemEffect {
    added: Option<String>,
    removed: Option<(String, ModuleDescriptor)>,
}

struct Simulation<'a> {
    available: &'a HashMap<String, ModuleDescriptor>,
    working: HashMap<String, ModuleDescriptor>,
    items: Vec<TenantModuleDescriptor>,
    effects: Vec<ItemEffect>,
    /// product names the user's plan pins to a specific version
    pinned_names: HashSet<String>,
    /// product names removed by explicit or cascaded disables
    disabled_names: HashSet<String>,
    /// violations already present in the input enabled set
    tolerated: HashSet<(String, String)>,
}

/// Expand `plan` so applying it to `enabled` leaves a self-consistent set.
///
/// Missing dependency providers are added (latest acceptable version,
/// ties broken by semver then full id), dependants of disabled modules
/// are cascade-disabled, and unsatisfiable items are marked
/// `action=conflict` with a message. The function is idempotent and its
/// output is in topological order over the closure.
pub fn install_simulate(
    available: &HashMap<String, ModuleDescriptor>,
    enabled: &HashMap<String, ModuleDescriptor>,
    plan: &[TenantModuleDescriptor],
) -> GatewayResult<Vec<TenantModuleDescriptor>> {
    for tm in plan {
        if tm.action.is_none() {
            return Err(GatewayError::user(format!(
                "missing action for module {}",
                tm.id
            )));
        }
    }

    let mut sim = Simulation {
        available,
        working: enabled.clone(),
        items: Vec::new(),
        effects: Vec::new(),
        pinned_names: HashSet::new(),
        disabled_names: HashSet::new(),
        tolerated: baseline_violations(enabled),
    };

    sim.normalize(plan);
    sim.close()?;
    sim.check_conflicts();
    Ok(sim.into_ordered(enabled))
}

fn baseline_violations(enabled: &HashMap<String, ModuleDescriptor>) -> HashSet<(String, String)> {
    let mut out = HashSet::new();
    for md in enabled.values() {
        if let Some(v) = first_violation(md, enabled) {
            out.insert((v.module, v.interface));
        }
    }
    out
}

fn product_name(id: &str) -> String {
    ModuleId::parse(id)
        .map(|m| m.name().to_string())
        .unwrap_or_else(|_| id.to_string())
}

impl<'a> Simulation<'a> {
    fn push(&mut self, tm: TenantModuleDescriptor, effect: ItemEffect) {
        self.items.push(tm);
        self.effects.push(effect);
    }

    fn push_conflict(&mut self, id: &str, message: String) {
        self.push(
            TenantModuleDescriptor {
                id: id.to_string(),
                from: None,
                action: Some(ModuleAction::Conflict),
                stage: None,
                message: Some(message),
            },
            ItemEffect::default(),
        );
    }

    /// Working-set entry sharing the product name of `id`
    fn enabled_version_of(&self, name: &str) -> Option<String> {
        self.working
            .keys()
            .find(|id| product_name(id) == name)
            .cloned()
    }

    fn normalize(&mut self, plan: &[TenantModuleDescriptor]) {
        for tm in plan {
            match tm.action {
                Some(ModuleAction::Conflict) | Some(ModuleAction::Uptodate) | None => {
                    self.push(tm.clone(), ItemEffect::default());
                }
                Some(ModuleAction::Enable) => self.normalize_enable(tm),
                Some(ModuleAction::Disable) => self.normalize_disable(tm),
            }
        }
    }

    fn normalize_enable(&mut self, tm: &TenantModuleDescriptor) {
        let target = if self.available.contains_key(&tm.id) {
            tm.id.clone()
        } else {
            let Ok(name) = ModuleId::parse(&tm.id) else {
                self.push_conflict(&tm.id, format!("module {} not found", tm.id));
                return;
            };
            match latest_of(&name, self.available.keys().map(String::as_str)) {
                Some(id) => id,
                None => {
                    self.push_conflict(&tm.id, format!("module {} not found", tm.id));
                    return;
                }
            }
        };

        let name = product_name(&target);
        self.pinned_names.insert(name.clone());

        if self.working.contains_key(&target) {
            self.push(
                TenantModuleDescriptor {
                    id: target,
                    from: None,
                    action: Some(ModuleAction::Uptodate),
                    stage: None,
                    message: None,
                },
                ItemEffect::default(),
            );
            return;
        }

        let mut effect = ItemEffect::default();
        let from = self.enabled_version_of(&name);
        if let Some(old_id) = &from {
            if let Some(old) = self.working.remove(old_id) {
                effect.removed = Some((old_id.clone(), old));
            }
        }
        self.working
            .insert(target.clone(), self.available[&target].clone());
        effect.added = Some(target.clone());
        self.push(
            TenantModuleDescriptor {
                id: target,
                from,
                action: Some(ModuleAction::Enable),
                stage: None,
                message: None,
            },
            effect,
        );
    }

    fn normalize_disable(&mut self, tm: &TenantModuleDescriptor) {
        let resolved = if self.working.contains_key(&tm.id) {
            Some(tm.id.clone())
        } else {
            self.enabled_version_of(&product_name(&tm.id))
        };
        let Some(id) = resolved else {
            self.push_conflict(&tm.id, format!("module {} not enabled", tm.id));
            return;
        };
        let Some(md) = self.working.remove(&id) else {
            return;
        };
        self.disabled_names.insert(product_name(&id));
        self.push(
            TenantModuleDescriptor {
                id: id.clone(),
                from: None,
                action: Some(ModuleAction::Disable),
                stage: None,
                message: None,
            },
            ItemEffect {
                added: None,
                removed: Some((id, md)),
            },
        );
    }

    /// Drive the working set to a dependency fixpoint
    fn close(&mut self) -> GatewayResult<()> {
        let budget = 4 * (self.available.len() + self.items.len() + 4);
        for _ in 0..budget {
            let Some(violation) = self.first_open_violation() else {
                return Ok(());
            };
            if self.disable_broke(&violation) {
                // a plan-introduced requirer conflicts; an originally
                // enabled one cascades
                match self.enable_item_for(&violation.module) {
                    Some(idx) => {
                        let message = format!(
                            "missing dependency for {} {} (required by {})",
                            violation.interface, violation.version, violation.module
                        );
                        self.revert_as_conflict(idx, message);
                    }
                    None => self.cascade_disable(&violation),
                }
                continue;
            }
            if self.add_provider(&violation) {
                continue;
            }
            self.attribute_conflict(&violation);
        }
        Err(GatewayError::internal(
            "dependency resolution did not converge".to_string(),
        ))
    }

    fn disable_broke(&self, v: &UnmetRequirement) -> bool {
        self.items.iter().zip(&self.effects).any(|(tm, eff)| {
            tm.action == Some(ModuleAction::Disable)
                && eff
                    .removed
                    .as_ref()
                    .is_some_and(|(_, md)| module_provides(md, &v.interface, &v.version))
        })
    }

    fn enable_item_for(&self, module: &str) -> Option<usize> {
        self.effects
            .iter()
            .position(|eff| eff.added.as_deref() == Some(module))
    }

    fn first_open_violation(&self) -> Option<UnmetRequirement> {
        let mut ids: Vec<&String> = self.working.keys().collect();
        ids.sort();
        for id in ids {
            if let Some(v) = first_violation(&self.working[id], &self.working) {
                if !self.tolerated.contains(&(v.module.clone(), v.interface.clone())) {
                    return Some(v);
                }
            }
        }
        None
    }

    /// When a disable removed the provider, the dependant is disabled too
    fn cascade_disable(&mut self, v: &UnmetRequirement) {
        let Some(md) = self.working.remove(&v.module) else {
            return;
        };
        self.disabled_names.insert(product_name(&v.module));
        self.push(
            TenantModuleDescriptor {
                id: v.module.clone(),
                from: None,
                action: Some(ModuleAction::Disable),
                stage: None,
                message: None,
            },
            ItemEffect {
                added: None,
                removed: Some((v.module.clone(), md)),
            },
        );
    }

    /// Add (or upgrade to) the best available provider for the violation
    fn add_provider(&mut self, v: &UnmetRequirement) -> bool {
        let mut candidates: Vec<&String> = self
            .available
            .iter()
            .filter(|(id, md)| {
                module_provides(md, &v.interface, &v.version)
                    && !self.disabled_names.contains(&product_name(id))
            })
            .map(|(id, _)| id)
            .collect();
        // a name the user pinned cannot be silently replaced
        candidates.retain(|id| {
            let name = product_name(id);
            !self.pinned_names.contains(&name) || !self.working_has_other_version(id, &name)
        });
        candidates.sort_by(|a, b| {
            let ma = ModuleId::parse(a).ok();
            let mb = ModuleId::parse(b).ok();
            ma.cmp(&mb).then_with(|| a.cmp(b))
        });
        let Some(best) = candidates.pop().cloned() else {
            return false;
        };
        if self.working.contains_key(&best) {
            // provider already present but version-inadequate elsewhere;
            // nothing more to add for this violation
            return false;
        }

        let name = product_name(&best);
        let from = self.enabled_version_of(&name);
        let mut effect = ItemEffect::default();
        if let Some(old_id) = &from {
            if let Some(old) = self.working.remove(old_id) {
                effect.removed = Some((old_id.clone(), old));
            }
        }
        self.working
            .insert(best.clone(), self.available[&best].clone());
        effect.added = Some(best.clone());
        self.push(
            TenantModuleDescriptor {
                id: best,
                from,
                action: Some(ModuleAction::Enable),
                stage: None,
                message: None,
            },
            effect,
        );
        true
    }

    fn working_has_other_version(&self, id: &str, name: &str) -> bool {
        self.working
            .keys()
            .any(|w| w != id && product_name(w) == name)
    }

    /// No fix exists: mark the responsible plan item and undo its effect
    fn attribute_conflict(&mut self, v: &UnmetRequirement) {
        let message = format!(
            "missing dependency for {} {} (required by {})",
            v.interface, v.version, v.module
        );
        // the item that enabled the requirer, else the one whose removal
        // lost the provider
        let culprit = self
            .effects
            .iter()
            .position(|eff| eff.added.as_deref() == Some(v.module.as_str()))
            .or_else(|| {
                self.effects.iter().position(|eff| {
                    eff.removed
                        .as_ref()
                        .is_some_and(|(_, md)| module_provides(md, &v.interface, &v.version))
                })
            });
        match culprit {
            Some(idx) => self.revert_as_conflict(idx, message),
            None => {
                // pre-existing breakage outside the plan; tolerate it
                self.tolerated
                    .insert((v.module.clone(), v.interface.clone()));
            }
        }
    }

    fn revert_as_conflict(&mut self, idx: usize, message: String) {
        let effect = std::mem::take(&mut self.effects[idx]);
        if let Some(added) = effect.added {
            self.working.remove(&added);
        }
        if let Some((old_id, old)) = effect.removed {
            self.working.insert(old_id, old);
        }
        let item = &mut self.items[idx];
        item.action = Some(ModuleAction::Conflict);
        item.message = Some(message);
    }

    /// Mark enable items whose module double-provides an interface
    fn check_conflicts(&mut self) {
        loop {
            let failure = conflict_failures(&self.working);
            let Some(conflict) = failure.conflicting.first() else {
                return;
            };
            // drop the item-introduced provider that sorts last
            let culprit = self
                .effects
                .iter()
                .enumerate()
                .filter(|(_, eff)| {
                    eff.added
                        .as_ref()
                        .is_some_and(|id| conflict.providers.iter().any(|p| p == id))
                })
                .max_by(|(_, a), (_, b)| a.added.cmp(&b.added))
                .map(|(idx, _)| idx);
            let Some(idx) = culprit else {
                // both providers pre-date the plan; nothing to mark
                return;
            };
            let other = conflict
                .providers
                .iter()
                .find(|p| Some(p.as_str()) != self.effects[idx].added.as_deref())
                .cloned()
                .unwrap_or_default();
            let message = format!(
                "interface {} already provided by {}",
                conflict.interface, other
            );
            self.revert_as_conflict(idx, message);
        }
    }

    /// Order items topologically: providers before their dependants
    fn into_ordered(self, enabled: &HashMap<String, ModuleDescriptor>) -> Vec<TenantModuleDescriptor> {
        let descriptor = |id: &str| -> Option<&ModuleDescriptor> {
            self.available.get(id).or_else(|| enabled.get(id))
        };

        let n = self.items.len();
        let mut dependants: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree = vec![0usize; n];
        for (i, a) in self.items.iter().enumerate() {
            let Some(da) = descriptor(&a.id) else { continue };
            for req in da.requires.iter().chain(&da.optional) {
                for (j, b) in self.items.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    let Some(db) = descriptor(&b.id) else { continue };
                    if module_provides(db, &req.id, &req.version) {
                        dependants[j].push(i);
                        indegree[i] += 1;
                    }
                }
            }
        }

        let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        ready.sort_by(|&a, &b| self.items[b].id.cmp(&self.items[a].id));
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop() {
            order.push(i);
            for &d in &dependants[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    ready.push(d);
                }
            }
            ready.sort_by(|&a, &b| self.items[b].id.cmp(&self.items[a].id));
        }
        // dependency cycles keep their input order at the tail
        for i in 0..n {
            if !order.contains(&i) {
                order.push(i);
            }
        }

        let mut items = self.items;
        let mut out = Vec::with_capacity(n);
        for i in order {
            out.push(std::mem::replace(
                &mut items[i],
                TenantModuleDescriptor::enable(""),
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modgate_common::InterfaceDescriptor;

    fn iface(id: &str, version: &str) -> InterfaceDescriptor {
        InterfaceDescriptor {
            id: id.into(),
            version: version.into(),
            interface_type: InterfaceType::Proxy,
            routing_entries: vec![],
        }
    }

    fn md(id: &str, provides: &[(&str, &str)], requires: &[(&str, &str)]) -> ModuleDescriptor {
        ModuleDescriptor {
            id: id.into(),
            name: product_name(id),
            provides: provides.iter().map(|(i, v)| iface(i, v)).collect(),
            requires: requires
                .iter()
                .map(|(i, v)| modgate_common::InterfaceReference {
                    id: (*i).into(),
                    version: (*v).into(),
                })
                .collect(),
            optional: vec![],
            permission_sets: vec![],
            expanded_permission_sets: vec![],
        }
    }

    fn set(mods: &[ModuleDescriptor]) -> HashMap<String, ModuleDescriptor> {
        mods.iter().map(|m| (m.id.clone(), m.clone())).collect()
    }

    #[test]
    fn test_dependencies_satisfied() {
        let mods = set(&[
            md("users-1.0.0", &[("users", "1.0")], &[]),
            md("mod-a-1.0.0", &[("a", "1.0")], &[("users", "1.0")]),
        ]);
        assert_eq!(check_all_dependencies(&mods), "");
    }

    #[test]
    fn test_dependencies_missing() {
        let mods = set(&[md("mod-a-1.0.0", &[], &[("users", "1.0")])]);
        let msg = check_all_dependencies(&mods);
        assert!(msg.contains("missing dependency for users"), "{msg}");
        assert!(msg.contains("mod-a-1.0.0"), "{msg}");
    }

    #[test]
    fn test_dependencies_minor_and_major() {
        // provided 1.1 satisfies required 1.0; provided 2.0 does not
        let ok = set(&[
            md("users-1.1.0", &[("users", "1.1")], &[]),
            md("mod-a-1.0.0", &[], &[("users", "1.0")]),
        ]);
        assert_eq!(check_all_dependencies(&ok), "");

        let bad = set(&[
            md("users-2.0.0", &[("users", "2.0")], &[]),
            md("mod-a-1.0.0", &[], &[("users", "1.0")]),
        ]);
        assert_ne!(check_all_dependencies(&bad), "");
    }

    #[test]
    fn test_conflicts() {
        let mods = set(&[
            md("users-1.0.0", &[("users", "1.0")], &[]),
            md("users-fork-1.0.0", &[("users", "1.1")], &[]),
        ]);
        let msg = check_all_conflicts(&mods);
        assert!(msg.contains("provided by multiple modules"), "{msg}");
    }

    #[test]
    fn test_conflicts_ignore_system_interfaces() {
        let mut a = md("mod-a-1.0.0", &[], &[]);
        let mut b = md("mod-b-1.0.0", &[], &[]);
        for m in [&mut a, &mut b] {
            m.provides.push(InterfaceDescriptor {
                id: "_tenant".into(),
                version: "1.1".into(),
                interface_type: InterfaceType::System,
                routing_entries: vec![],
            });
        }
        assert_eq!(check_all_conflicts(&set(&[a, b])), "");
    }

    #[test]
    fn test_simulate_adds_missing_provider() {
        let available = set(&[
            md("users-1.0.0", &[("users", "1.0")], &[]),
            md("users-1.2.0", &[("users", "1.2")], &[]),
            md("mod-a-1.0.0", &[("a", "1.0")], &[("users", "1.0")]),
        ]);
        let enabled = HashMap::new();
        let plan = vec![TenantModuleDescriptor::enable("mod-a-1.0.0")];

        let out = install_simulate(&available, &enabled, &plan).unwrap();
        assert_eq!(out.len(), 2);
        // latest acceptable provider wins and precedes its dependant
        assert_eq!(out[0].id, "users-1.2.0");
        assert_eq!(out[0].action, Some(ModuleAction::Enable));
        assert_eq!(out[1].id, "mod-a-1.0.0");
    }

    #[test]
    fn test_simulate_upgrade_sets_from() {
        let available = set(&[
            md("users-1.0.0", &[("users", "1.0")], &[]),
            md("users-1.1.0", &[("users", "1.1")], &[]),
        ]);
        let enabled = set(&[md("users-1.0.0", &[("users", "1.0")], &[])]);
        let plan = vec![TenantModuleDescriptor::enable("users-1.1.0")];

        let out = install_simulate(&available, &enabled, &plan).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, Some(ModuleAction::Enable));
        assert_eq!(out[0].from.as_deref(), Some("users-1.0.0"));
    }

    #[test]
    fn test_simulate_upgrade_breaking_dependant_conflicts() {
        // users-1.1.0 bumps its provided interface to 2.0, which mod-a
        // cannot use; the upgrade item must come back as a conflict
        let available = set(&[
            md("users-1.0.0", &[("users", "1.0")], &[]),
            md("users-1.1.0", &[("users", "2.0")], &[]),
            md("mod-a-1.0.0", &[("a", "1.0")], &[("users", "1.0")]),
        ]);
        let enabled = set(&[
            md("users-1.0.0", &[("users", "1.0")], &[]),
            md("mod-a-1.0.0", &[("a", "1.0")], &[("users", "1.0")]),
        ]);
        let plan = vec![TenantModuleDescriptor::enable("users-1.1.0")];

        let out = install_simulate(&available, &enabled, &plan).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, Some(ModuleAction::Conflict));
        assert!(out[0].message.as_deref().unwrap().contains("users"));
    }

    #[test]
    fn test_simulate_cascade_disable() {
        let available = set(&[
            md("users-1.0.0", &[("users", "1.0")], &[]),
            md("mod-a-1.0.0", &[("a", "1.0")], &[("users", "1.0")]),
        ]);
        let enabled = available.clone();
        let plan = vec![TenantModuleDescriptor::disable("users-1.0.0")];

        let out = install_simulate(&available, &enabled, &plan).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out
            .iter()
            .all(|tm| tm.action == Some(ModuleAction::Disable)));
        assert!(out.iter().any(|tm| tm.id == "mod-a-1.0.0"));
        // provider before dependant, per the closure's topological order
        assert_eq!(out[0].id, "users-1.0.0");
    }

    #[test]
    fn test_simulate_enable_already_enabled_is_uptodate() {
        let available = set(&[md("users-1.0.0", &[("users", "1.0")], &[])]);
        let enabled = available.clone();
        let plan = vec![TenantModuleDescriptor::enable("users-1.0.0")];

        let out = install_simulate(&available, &enabled, &plan).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, Some(ModuleAction::Uptodate));
    }

    #[test]
    fn test_simulate_unknown_module_conflicts() {
        let out = install_simulate(
            &HashMap::new(),
            &HashMap::new(),
            &[TenantModuleDescriptor::enable("ghost-1.0.0")],
        )
        .unwrap();
        assert_eq!(out[0].action, Some(ModuleAction::Conflict));
        assert!(out[0].message.as_deref().unwrap().contains("not found"));
    }

    #[test]
    fn test_simulate_missing_action_rejected() {
        let mut tm = TenantModuleDescriptor::enable("x-1.0.0");
        tm.action = None;
        let err = install_simulate(&HashMap::new(), &HashMap::new(), &[tm]).unwrap_err();
        assert_eq!(err.error_type(), "USER");
    }

    #[test]
    fn test_simulate_idempotent() {
        let available = set(&[
            md("users-1.0.0", &[("users", "1.0")], &[]),
            md("users-1.1.0", &[("users", "2.0")], &[]),
            md("mod-a-1.0.0", &[("a", "1.0")], &[("users", "1.0")]),
            md("mod-b-1.0.0", &[("b", "1.0")], &[("a", "1.0")]),
        ]);
        let enabled = set(&[
            md("users-1.0.0", &[("users", "1.0")], &[]),
            md("mod-a-1.0.0", &[("a", "1.0")], &[("users", "1.0")]),
        ]);
        let plans = vec![
            vec![TenantModuleDescriptor::enable("mod-b-1.0.0")],
            vec![TenantModuleDescriptor::enable("users-1.1.0")],
            vec![TenantModuleDescriptor::disable("users-1.0.0")],
            vec![
                TenantModuleDescriptor::enable("mod-b-1.0.0"),
                TenantModuleDescriptor::disable("mod-a-1.0.0"),
            ],
        ];
        for plan in plans {
            let once = install_simulate(&available, &enabled, &plan).unwrap();
            let twice = install_simulate(&available, &enabled, &once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_simulate_topological_order() {
        let available = set(&[
            md("base-1.0.0", &[("base", "1.0")], &[]),
            md("mid-1.0.0", &[("mid", "1.0")], &[("base", "1.0")]),
            md("top-1.0.0", &[("top", "1.0")], &[("mid", "1.0")]),
        ]);
        let plan = vec![TenantModuleDescriptor::enable("top-1.0.0")];
        let out = install_simulate(&available, &HashMap::new(), &plan).unwrap();
        let ids: Vec<&str> = out.iter().map(|tm| tm.id.as_str()).collect();
        assert_eq!(ids, vec!["base-1.0.0", "mid-1.0.0", "top-1.0.0"]);
    }
}
