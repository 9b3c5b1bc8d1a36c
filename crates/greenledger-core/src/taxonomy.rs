//! Versioned disclosure taxonomy (ESRS requirement tree) and its store.
//!
//! A [`Taxonomy`] is one published version of the requirement tree. Nodes are
//! keyed by [`RequirementId`] and point at their parent by id, so a version
//! can be shared read-only across threads behind an `Arc`. The
//! [`TaxonomyStore`] only ever adds versions; a published version is never
//! mutated.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::evidence::EvidenceType;
use crate::period::ReportingPeriod;
use crate::sort_key::normalize_code;

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("taxonomy version {version} has no requirements")]
    Empty { version: u32 },

    #[error("duplicate requirement id {0}")]
    DuplicateId(RequirementId),

    #[error("duplicate disclosure code {0:?}")]
    DuplicateCode(String),

    #[error("requirement {child} references unknown parent {parent}")]
    UnknownParent {
        child: RequirementId,
        parent: RequirementId,
    },

    #[error("requirement {0} is part of a parent cycle")]
    Cycle(RequirementId),

    #[error("leaf requirement {0} declares no required evidence types")]
    LeafWithoutEvidence(RequirementId),

    #[error("requirement {0} has children but declares required evidence types")]
    BranchWithEvidence(RequirementId),

    #[error("requirement {0} has a zero validity period")]
    ZeroValidity(RequirementId),

    #[error("requirement {0}: applicable_until is before applicable_from")]
    InvertedWindow(RequirementId),

    #[error("requirement {0} has an empty label or code")]
    MissingText(RequirementId),

    #[error("taxonomy version {0} is already published with different content")]
    VersionConflict(u32),

    #[error("cannot read taxonomy source {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse taxonomy JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot parse taxonomy YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Stable identifier of a requirement node (e.g. "E2-4").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequirementId(String);

impl RequirementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequirementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequirementId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Whether a disclosure is required or may be reported voluntarily.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Obligation {
    #[default]
    Mandatory,
    Voluntary,
}

/// One requirement as written in a taxonomy source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSpec {
    pub id: RequirementId,
    #[serde(default)]
    pub parent_id: Option<RequirementId>,
    pub code: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Extra vocabulary that identifies evidence for this requirement.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub required_evidence_types: BTreeSet<EvidenceType>,
    /// How long accepted evidence stays valid, in days.
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    #[serde(default)]
    pub applicable_from: Option<NaiveDate>,
    #[serde(default)]
    pub applicable_until: Option<NaiveDate>,
    #[serde(default)]
    pub obligation: Obligation,
}

fn default_validity_days() -> u32 {
    365
}

/// A versioned taxonomy source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyDocument {
    pub version: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub requirements: Vec<RequirementSpec>,
}

impl TaxonomyDocument {
    pub fn from_json(json: &str) -> Result<Self, TaxonomyError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, TaxonomyError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: &Path) -> Result<Self, TaxonomyError> {
        let text = std::fs::read_to_string(path).map_err(|source| TaxonomyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&text),
            _ => Self::from_json(&text),
        }
    }

    fn fingerprint(&self) -> String {
        // Serialising our own derive cannot fail; an empty hash would only
        // make a later republish look different, never the same.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

/// A published requirement node. Immutable within its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementNode {
    pub id: RequirementId,
    pub parent_id: Option<RequirementId>,
    pub code: String,
    pub label: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub required_evidence_types: BTreeSet<EvidenceType>,
    pub validity_days: u32,
    pub applicable_from: Option<NaiveDate>,
    pub applicable_until: Option<NaiveDate>,
    pub obligation: Obligation,
    pub version: u32,
}

impl RequirementNode {
    fn from_spec(spec: RequirementSpec, version: u32) -> Self {
        Self {
            id: spec.id,
            parent_id: spec.parent_id,
            code: spec.code,
            label: spec.label,
            description: spec.description,
            keywords: spec.keywords,
            required_evidence_types: spec.required_evidence_types,
            validity_days: spec.validity_days,
            applicable_from: spec.applicable_from,
            applicable_until: spec.applicable_until,
            obligation: spec.obligation,
            version,
        }
    }

    pub fn validity_period(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.validity_days))
    }

    pub fn accepts(&self, evidence_type: &EvidenceType) -> bool {
        self.required_evidence_types.contains(evidence_type)
    }

    pub fn applies_to(&self, period: &ReportingPeriod) -> bool {
        period.overlaps(self.applicable_from, self.applicable_until)
    }

    pub fn sort_key(&self) -> String {
        normalize_code(&self.code)
    }
}

/// One published, validated version of the requirement tree.
#[derive(Debug)]
pub struct Taxonomy {
    version: u32,
    name: Option<String>,
    fingerprint: String,
    nodes: HashMap<RequirementId, RequirementNode>,
    /// parent id → children ordered by disclosure code
    children: HashMap<RequirementId, Vec<RequirementId>>,
    roots: Vec<RequirementId>,
    depth: HashMap<RequirementId, usize>,
    /// All node ids in disclosure-code order.
    ordered: Vec<RequirementId>,
}

impl Taxonomy {
    /// Validate a document and build the tree.
    pub fn build(document: TaxonomyDocument) -> Result<Self, TaxonomyError> {
        let version = document.version;
        if document.requirements.is_empty() {
            return Err(TaxonomyError::Empty { version });
        }
        let fingerprint = document.fingerprint();
        let name = document.name.clone();

        let mut nodes: HashMap<RequirementId, RequirementNode> = HashMap::new();
        let mut codes = BTreeSet::new();
        for spec in document.requirements {
            if spec.code.trim().is_empty() || spec.label.trim().is_empty() {
                return Err(TaxonomyError::MissingText(spec.id));
            }
            if spec.validity_days == 0 {
                return Err(TaxonomyError::ZeroValidity(spec.id));
            }
            if let (Some(from), Some(until)) = (spec.applicable_from, spec.applicable_until)
                && until < from
            {
                return Err(TaxonomyError::InvertedWindow(spec.id));
            }
            if !codes.insert(normalize_code(&spec.code)) {
                return Err(TaxonomyError::DuplicateCode(spec.code));
            }
            if nodes.contains_key(&spec.id) {
                return Err(TaxonomyError::DuplicateId(spec.id));
            }
            nodes.insert(spec.id.clone(), RequirementNode::from_spec(spec, version));
        }

        // Parent links must resolve.
        let mut children: HashMap<RequirementId, Vec<RequirementId>> = HashMap::new();
        let mut roots = Vec::new();
        for node in nodes.values() {
            match &node.parent_id {
                Some(parent) if !nodes.contains_key(parent) => {
                    return Err(TaxonomyError::UnknownParent {
                        child: node.id.clone(),
                        parent: parent.clone(),
                    });
                }
                Some(parent) => children
                    .entry(parent.clone())
                    .or_default()
                    .push(node.id.clone()),
                None => roots.push(node.id.clone()),
            }
        }

        // Every node must reach a root within `nodes.len()` hops.
        let mut depth = HashMap::with_capacity(nodes.len());
        for id in nodes.keys() {
            let mut hops = 0usize;
            let mut cursor = nodes[id].parent_id.as_ref();
            while let Some(parent) = cursor {
                hops += 1;
                if hops > nodes.len() {
                    return Err(TaxonomyError::Cycle(id.clone()));
                }
                cursor = nodes[parent].parent_id.as_ref();
            }
            depth.insert(id.clone(), hops);
        }

        for node in nodes.values() {
            let is_leaf = !children.contains_key(&node.id);
            if is_leaf && node.required_evidence_types.is_empty() {
                return Err(TaxonomyError::LeafWithoutEvidence(node.id.clone()));
            }
            if !is_leaf && !node.required_evidence_types.is_empty() {
                return Err(TaxonomyError::BranchWithEvidence(node.id.clone()));
            }
        }

        let by_code = |a: &RequirementId, b: &RequirementId| {
            normalize_code(&nodes[a].code)
                .cmp(&normalize_code(&nodes[b].code))
                .then_with(|| a.cmp(b))
        };
        for list in children.values_mut() {
            list.sort_by(by_code);
        }
        roots.sort_by(by_code);
        let mut ordered: Vec<RequirementId> = nodes.keys().cloned().collect();
        ordered.sort_by(by_code);

        info!(
            version,
            requirements = nodes.len(),
            roots = roots.len(),
            "built taxonomy"
        );

        Ok(Self {
            version,
            name,
            fingerprint,
            nodes,
            children,
            roots,
            depth,
            ordered,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &RequirementId) -> Option<&RequirementNode> {
        self.nodes.get(id)
    }

    pub fn roots(&self) -> &[RequirementId] {
        &self.roots
    }

    pub fn children(&self, id: &RequirementId) -> &[RequirementId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_leaf(&self, id: &RequirementId) -> bool {
        !self.children.contains_key(id)
    }

    /// Distance from the node's root (roots are depth 0).
    pub fn depth(&self, id: &RequirementId) -> usize {
        self.depth.get(id).copied().unwrap_or(0)
    }

    /// All nodes in disclosure-code order.
    pub fn nodes(&self) -> impl Iterator<Item = &RequirementNode> {
        self.ordered.iter().map(|id| &self.nodes[id])
    }

    /// Leaf nodes in disclosure-code order.
    pub fn leaves(&self) -> impl Iterator<Item = &RequirementNode> {
        self.nodes().filter(|n| self.is_leaf(&n.id))
    }

    /// Leaves whose obligation and applicability window put them in scope
    /// of gap detection for `period`.
    pub fn in_scope_leaves<'a>(
        &'a self,
        period: &'a ReportingPeriod,
    ) -> impl Iterator<Item = &'a RequirementNode> + 'a {
        self.leaves().filter(move |n| is_in_scope(n, period))
    }

    /// In-scope leaf descendants of `id` (the node itself if it is a leaf).
    pub fn in_scope_leaf_descendants(
        &self,
        id: &RequirementId,
        period: &ReportingPeriod,
    ) -> Vec<&RequirementNode> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            if self.is_leaf(current) {
                if is_in_scope(node, period) {
                    out.push(node);
                }
            } else {
                // Reverse so the pop order follows code order.
                stack.extend(self.children(current).iter().rev());
            }
        }
        out
    }

    /// Chain of ancestors from the parent up to the root.
    pub fn ancestors(&self, id: &RequirementId) -> Vec<&RequirementNode> {
        let mut out = Vec::new();
        let mut cursor = self.nodes.get(id).and_then(|n| n.parent_id.as_ref());
        while let Some(parent) = cursor {
            let Some(node) = self.nodes.get(parent) else {
                break;
            };
            out.push(node);
            cursor = node.parent_id.as_ref();
        }
        out
    }
}

fn is_in_scope(node: &RequirementNode, period: &ReportingPeriod) -> bool {
    node.obligation == Obligation::Mandatory && node.applies_to(period)
}

/// Holds every published taxonomy version.
///
/// Publishing only adds versions; the latest version is what new pipeline
/// runs and detection cycles read.
#[derive(Debug, Default)]
pub struct TaxonomyStore {
    versions: RwLock<BTreeMap<u32, Arc<Taxonomy>>>,
}

impl TaxonomyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a document as a new version.
    ///
    /// Publishing an already-published version with identical content is a
    /// no-op returning the existing version.
    pub fn publish(&self, document: TaxonomyDocument) -> Result<Arc<Taxonomy>, TaxonomyError> {
        let version = document.version;
        let fingerprint = document.fingerprint();
        {
            let versions = self.versions.read().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = versions.get(&version) {
                if existing.fingerprint == fingerprint {
                    return Ok(Arc::clone(existing));
                }
                return Err(TaxonomyError::VersionConflict(version));
            }
        }

        let taxonomy = Arc::new(Taxonomy::build(document)?);
        let mut versions = self.versions.write().unwrap_or_else(|e| e.into_inner());
        match versions.get(&version) {
            // Lost a race with an identical publish.
            Some(existing) if existing.fingerprint == fingerprint => Ok(Arc::clone(existing)),
            Some(_) => Err(TaxonomyError::VersionConflict(version)),
            None => {
                versions.insert(version, Arc::clone(&taxonomy));
                info!(version, "published taxonomy version");
                Ok(taxonomy)
            }
        }
    }

    /// Load and publish a taxonomy file.
    pub fn load_path(&self, path: &Path) -> Result<Arc<Taxonomy>, TaxonomyError> {
        self.publish(TaxonomyDocument::from_path(path)?)
    }

    /// The highest published version.
    pub fn latest(&self) -> Option<Arc<Taxonomy>> {
        let versions = self.versions.read().unwrap_or_else(|e| e.into_inner());
        versions.values().next_back().cloned()
    }

    pub fn get(&self, version: u32) -> Option<Arc<Taxonomy>> {
        let versions = self.versions.read().unwrap_or_else(|e| e.into_inner());
        versions.get(&version).cloned()
    }

    pub fn versions(&self) -> Vec<u32> {
        let versions = self.versions.read().unwrap_or_else(|e| e.into_inner());
        versions.keys().copied().collect()
    }
}
