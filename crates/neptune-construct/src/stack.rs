//! Stack: the unit of deployment.
//!
//! A stack owns every declared resource, keyed by a logical ID derived from
//! the construct path. Dependencies are never declared by hand for values:
//! they are read back from the tokens embedded in resource properties, so a
//! resource may consume a value of a resource declared after it and the
//! deployment order still comes out right.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use crate::asset::{AssetLocation, FileAsset};
use crate::error::{ConstructError, Result};
use crate::prop::Prop;
use crate::template::Template;
use crate::token::{LogicalId, Token};

/// Maximum length of a CloudFormation logical ID.
const MAX_LOGICAL_ID_LEN: usize = 255;
/// Hex digits of the path hash appended to multi-component logical IDs.
const HASH_LEN: usize = 8;

/// What happens to a resource when it leaves the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    /// Delete the resource together with the stack.
    #[default]
    Destroy,
    /// Orphan the resource.
    Retain,
    /// Take a final snapshot, then delete.
    Snapshot,
}

impl RemovalPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Destroy => "Delete",
            Self::Retain => "Retain",
            Self::Snapshot => "Snapshot",
        }
    }
}

impl std::str::FromStr for RemovalPolicy {
    type Err = ConstructError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "destroy" | "delete" => Ok(Self::Destroy),
            "retain" => Ok(Self::Retain),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(ConstructError::invalid(
                "removal policy",
                format!("'{other}' is not one of destroy, retain, snapshot"),
            )),
        }
    }
}

/// Target account/region. Unset fields synthesize an environment-agnostic
/// template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    /// `aws://account/region`, with `unknown-*` placeholders.
    pub fn uri(&self) -> String {
        format!(
            "aws://{}/{}",
            self.account.as_deref().unwrap_or("unknown-account"),
            self.region.as_deref().unwrap_or("unknown-region"),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct StackProps {
    pub description: Option<String>,
    pub env: Environment,
}

/// A declared CloudFormation resource.
#[derive(Debug, Clone)]
pub struct Resource {
    path: String,
    resource_type: String,
    properties: Prop,
    depends_on: BTreeSet<LogicalId>,
    removal_policy: Option<RemovalPolicy>,
}

impl Resource {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn properties(&self) -> &Prop {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Prop {
        &mut self.properties
    }

    pub fn depends_on(&self) -> &BTreeSet<LogicalId> {
        &self.depends_on
    }

    pub fn removal_policy(&self) -> Option<RemovalPolicy> {
        self.removal_policy
    }

    /// Value and explicit dependencies, excluding self-references.
    pub fn dependencies(&self, own_id: &LogicalId) -> BTreeSet<LogicalId> {
        let mut deps = self.depends_on.clone();
        self.properties.collect_references(&mut deps);
        deps.remove(own_id);
        deps
    }
}

/// A stack output.
#[derive(Debug, Clone)]
pub struct Output {
    pub value: Token,
    pub description: Option<String>,
}

/// A deployable set of resources.
#[derive(Debug)]
pub struct Stack {
    name: String,
    props: StackProps,
    resources: BTreeMap<LogicalId, Resource>,
    /// Logical IDs in declaration order.
    declared: Vec<LogicalId>,
    paths: BTreeSet<String>,
    outputs: BTreeMap<String, Output>,
    assets: BTreeMap<String, FileAsset>,
}

impl Stack {
    pub fn new(name: &str, props: StackProps) -> Result<Self> {
        validate_stack_name(name)?;
        Ok(Self {
            name: name.to_string(),
            props,
            resources: BTreeMap::new(),
            declared: Vec::new(),
            paths: BTreeSet::new(),
            outputs: BTreeMap::new(),
            assets: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &Environment {
        &self.props.env
    }

    pub fn description(&self) -> Option<&str> {
        self.props.description.as_deref()
    }

    /// Declares a resource at the given construct path.
    pub fn add_resource(
        &mut self,
        path: &[&str],
        resource_type: &str,
        properties: Prop,
    ) -> Result<LogicalId> {
        for component in path {
            validate_id(component)?;
        }
        if path.is_empty() {
            return Err(ConstructError::InvalidId(String::new()));
        }

        let full_path = path.join("/");
        if !self.paths.insert(full_path.clone()) {
            return Err(ConstructError::DuplicateId(full_path));
        }

        let id = LogicalId::new(allocate_logical_id(path));
        if self.resources.contains_key(&id) {
            self.paths.remove(&full_path);
            return Err(ConstructError::DuplicateId(id.to_string()));
        }

        tracing::debug!(logical_id = %id, resource_type, path = %full_path, "Declared resource");

        self.resources.insert(
            id.clone(),
            Resource {
                path: full_path,
                resource_type: resource_type.to_string(),
                properties,
                depends_on: BTreeSet::new(),
                removal_policy: None,
            },
        );
        self.declared.push(id.clone());
        Ok(id)
    }

    pub fn resource(&self, id: &LogicalId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn resource_mut(&mut self, id: &LogicalId) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    /// Like `resource_mut` but fails with a dangling-reference error.
    pub(crate) fn expect_resource_mut(&mut self, id: &LogicalId) -> Result<&mut Resource> {
        self.resources
            .get_mut(id)
            .ok_or_else(|| ConstructError::DanglingReference {
                from: self.name.clone(),
                to: id.to_string(),
            })
    }

    /// Resources of one type, in declaration order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a LogicalId, &'a Resource)> + 'a {
        self.declared.iter().filter_map(move |id| {
            let res = &self.resources[id];
            (res.resource_type == resource_type).then_some((id, res))
        })
    }

    /// All logical IDs in declaration order.
    pub fn logical_ids(&self) -> &[LogicalId] {
        &self.declared
    }

    /// Adds an explicit `DependsOn` edge.
    pub fn add_dependency(&mut self, dependent: &LogicalId, target: &LogicalId) -> Result<()> {
        if !self.resources.contains_key(target) {
            return Err(ConstructError::DanglingReference {
                from: dependent.to_string(),
                to: target.to_string(),
            });
        }
        let res = self.expect_resource_mut(dependent)?;
        if dependent != target {
            res.depends_on.insert(target.clone());
        }
        Ok(())
    }

    pub fn set_removal_policy(&mut self, id: &LogicalId, policy: RemovalPolicy) -> Result<()> {
        self.expect_resource_mut(id)?.removal_policy = Some(policy);
        Ok(())
    }

    /// Declares a stack output. Output IDs must be alphanumeric.
    pub fn add_output(&mut self, id: &str, value: Token, description: Option<&str>) -> Result<()> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConstructError::InvalidId(id.to_string()));
        }
        if self.outputs.contains_key(id) {
            return Err(ConstructError::DuplicateId(id.to_string()));
        }
        self.outputs.insert(
            id.to_string(),
            Output {
                value,
                description: description.map(str::to_string),
            },
        );
        Ok(())
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        &self.outputs
    }

    /// Registers a file asset; identical content is staged once.
    pub fn add_file_asset(&mut self, asset: FileAsset) -> AssetLocation {
        let location = asset.location();
        self.assets.entry(asset.hash().to_string()).or_insert(asset);
        location
    }

    pub fn assets(&self) -> impl Iterator<Item = &FileAsset> {
        self.assets.values()
    }

    /// Direct dependencies of a resource.
    pub fn dependencies_of(&self, id: &LogicalId) -> BTreeSet<LogicalId> {
        self.resources
            .get(id)
            .map(|r| r.dependencies(id))
            .unwrap_or_default()
    }

    /// Checks that every token points at a declared resource.
    pub fn validate_references(&self) -> Result<()> {
        for id in &self.declared {
            for dep in self.dependencies_of(id) {
                if !self.resources.contains_key(&dep) {
                    return Err(ConstructError::DanglingReference {
                        from: id.to_string(),
                        to: dep.to_string(),
                    });
                }
            }
        }
        for (name, output) in &self.outputs {
            for dep in output.value.references() {
                if !self.resources.contains_key(&dep) {
                    return Err(ConstructError::DanglingReference {
                        from: format!("Outputs.{name}"),
                        to: dep.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Topological order in which the provisioning engine can create the
    /// resources. Among resources that are ready at the same time,
    /// declaration order wins, so the result is stable.
    pub fn deployment_order(&self) -> Result<Vec<LogicalId>> {
        self.validate_references()?;

        let index: BTreeMap<&LogicalId, usize> =
            self.declared.iter().enumerate().map(|(i, id)| (id, i)).collect();

        let mut pending: BTreeMap<&LogicalId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<LogicalId, Vec<&LogicalId>> = BTreeMap::new();
        for id in &self.declared {
            let deps = self.dependencies_of(id);
            pending.insert(id, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut ready: BTreeSet<(usize, &LogicalId)> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| (index[id], *id))
            .collect();

        let mut order = Vec::with_capacity(self.declared.len());
        while let Some((_, id)) = ready.pop_first() {
            order.push(id.clone());
            for next in dependents.get(id).into_iter().flatten() {
                if let Some(n) = pending.get_mut(next) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert((index[next], *next));
                    }
                }
            }
        }

        if order.len() < self.declared.len() {
            let placed: BTreeSet<&LogicalId> = order.iter().collect();
            let stuck = self
                .declared
                .iter()
                .filter(|id| !placed.contains(id))
                .map(ToString::to_string)
                .collect();
            return Err(ConstructError::DependencyCycle(stuck));
        }

        Ok(order)
    }

    /// Validates the stack and renders its template.
    pub fn synth(&self) -> Result<Template> {
        let order = self.deployment_order()?;
        let template = Template::render(self);
        tracing::info!(
            stack = %self.name,
            resources = order.len(),
            outputs = self.outputs.len(),
            assets = self.assets.len(),
            "Synthesized stack",
        );
        Ok(template)
    }
}

/// Construct ids may not be empty or contain the path separator.
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') {
        return Err(ConstructError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Stack names: letter first, then alphanumerics and hyphens, max 128.
fn validate_stack_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = name.len() <= 128
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ConstructError::InvalidId(name.to_string()))
    }
}

/// Derives a logical ID from a construct path.
///
/// A single-component path maps to its alphanumeric characters. Longer paths
/// join their components (dropping trailing `Resource`/`Default` and
/// consecutive duplicates) and append a hash of the full path so that
/// distinct paths never collide after sanitizing.
fn allocate_logical_id(path: &[&str]) -> String {
    if let [single] = path {
        let id = sanitize(single);
        if !id.is_empty() {
            return truncate(id, MAX_LOGICAL_ID_LEN);
        }
    }

    let hash = path_hash(path);
    let mut human: Vec<&str> = Vec::with_capacity(path.len());
    for (i, component) in path.iter().enumerate() {
        let last = i + 1 == path.len();
        if last && (*component == "Resource" || *component == "Default") {
            continue;
        }
        if human.last() != Some(component) {
            human.push(*component);
        }
    }
    let human: String = human.iter().map(|c| sanitize(c)).collect();
    let human = truncate(human, MAX_LOGICAL_ID_LEN - HASH_LEN);
    format!("{human}{hash}")
}

fn path_hash(path: &[&str]) -> String {
    let digest = Sha256::digest(path.join("/").as_bytes());
    hex::encode_upper(digest)[..HASH_LEN].to_string()
}

fn sanitize(component: &str) -> String {
    component
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

fn truncate(mut s: String, max: usize) -> String {
    s.truncate(max);
    s
}
