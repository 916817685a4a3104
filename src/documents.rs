//! On-demand document assembly for selected candidates.
//!
//! For each selected historical project the assembler fetches up to three
//! artifacts (design document, effort workbook, backlog workbook), parses
//! them into typed representations, and later projects a narrow, size-capped
//! context for each generation step.
//!
//! # Parsing policy
//!
//! - Design sections are located by heading text through [`SECTION_ALIASES`]:
//!   exact match first, then a case-insensitive match with leading numbering
//!   (`"2.1 "`, `"3) "`) removed. Missing sections are simply absent.
//! - Workbook header rows are the first row whose non-empty cells are all
//!   non-numeric text, preferring one that names a known column. Extra
//!   columns are ignored; missing columns default to empty / zero.
//! - A candidate whose referenced file is missing or corrupt is dropped from
//!   the batch with a warning; the other candidates are unaffected.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::config::DocumentsConfig;
use crate::extract::{extract_docx_paragraphs, extract_xlsx_rows, ExtractError};
use crate::models::{ArtifactKind, CandidateRecord};

// ═══════════════════════════════════════════════════════════════════════
// Document storage
// ═══════════════════════════════════════════════════════════════════════

/// Source of raw document bytes, addressed by handle.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch(&self, handle: &str) -> Result<Vec<u8>>;
}

/// Resolves handles as relative paths under a root directory.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, handle: &str) -> Result<PathBuf> {
        let rel = Path::new(handle);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            bail!("document handle escapes the document root: {}", handle);
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn fetch(&self, handle: &str) -> Result<Vec<u8>> {
        let path = self.resolve(handle)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read document: {}", path.display()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Design documents
// ═══════════════════════════════════════════════════════════════════════

/// Canonical design-document sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKey {
    Overview,
    Background,
    Scope,
    Architecture,
    Modules,
    DataModel,
    Interfaces,
    Security,
    Risks,
    Testing,
    Deployment,
}

/// Heading variant → canonical section.
pub const SECTION_ALIASES: &[(&str, SectionKey)] = &[
    ("Overview", SectionKey::Overview),
    ("Summary", SectionKey::Overview),
    ("Executive Summary", SectionKey::Overview),
    ("Introduction", SectionKey::Overview),
    ("概述", SectionKey::Overview),
    ("Background", SectionKey::Background),
    ("Context", SectionKey::Background),
    ("Motivation", SectionKey::Background),
    ("背景", SectionKey::Background),
    ("Scope", SectionKey::Scope),
    ("Requirements", SectionKey::Scope),
    ("Goals", SectionKey::Scope),
    ("Goals and Non-Goals", SectionKey::Scope),
    ("需求范围", SectionKey::Scope),
    ("Architecture", SectionKey::Architecture),
    ("System Architecture", SectionKey::Architecture),
    ("Technical Design", SectionKey::Architecture),
    ("Solution Design", SectionKey::Architecture),
    ("Design", SectionKey::Architecture),
    ("系统架构", SectionKey::Architecture),
    ("技术方案", SectionKey::Architecture),
    ("Modules", SectionKey::Modules),
    ("Components", SectionKey::Modules),
    ("Affected Modules", SectionKey::Modules),
    ("Impacted Modules", SectionKey::Modules),
    ("Module Design", SectionKey::Modules),
    ("模块设计", SectionKey::Modules),
    ("影响模块", SectionKey::Modules),
    ("Data Model", SectionKey::DataModel),
    ("Database Design", SectionKey::DataModel),
    ("Schema", SectionKey::DataModel),
    ("数据模型", SectionKey::DataModel),
    ("数据库设计", SectionKey::DataModel),
    ("Interfaces", SectionKey::Interfaces),
    ("API", SectionKey::Interfaces),
    ("API Design", SectionKey::Interfaces),
    ("Integration", SectionKey::Interfaces),
    ("接口设计", SectionKey::Interfaces),
    ("Security", SectionKey::Security),
    ("Security Considerations", SectionKey::Security),
    ("安全设计", SectionKey::Security),
    ("Risks", SectionKey::Risks),
    ("Risks and Mitigations", SectionKey::Risks),
    ("Open Issues", SectionKey::Risks),
    ("风险", SectionKey::Risks),
    ("Testing", SectionKey::Testing),
    ("Test Plan", SectionKey::Testing),
    ("Test Strategy", SectionKey::Testing),
    ("测试方案", SectionKey::Testing),
    ("Deployment", SectionKey::Deployment),
    ("Rollout", SectionKey::Deployment),
    ("Rollout Plan", SectionKey::Deployment),
    ("Release Plan", SectionKey::Deployment),
    ("部署方案", SectionKey::Deployment),
    ("上线计划", SectionKey::Deployment),
];

/// Drop leading outline numbering such as `"2."`, `"3.1"`, `"4)"`, `"IV."`-free forms.
fn strip_numbering(heading: &str) -> &str {
    let trimmed = heading.trim();
    let rest = trimmed.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')');
    if rest.len() == trimmed.len() {
        trimmed
    } else {
        rest.trim_start()
    }
}

/// Resolve a heading to its canonical section: exact alias first, then a
/// case-insensitive, numbering-insensitive comparison.
pub fn resolve_section(heading: &str) -> Option<SectionKey> {
    let exact = heading.trim();
    if let Some((_, key)) = SECTION_ALIASES.iter().find(|(alias, _)| *alias == exact) {
        return Some(*key);
    }
    let loose = strip_numbering(exact).to_lowercase();
    SECTION_ALIASES
        .iter()
        .find(|(alias, _)| alias.to_lowercase() == loose)
        .map(|(_, key)| *key)
}

/// A document block: either a heading (with depth) or a body paragraph.
#[derive(Debug, Clone, PartialEq)]
struct Block {
    heading: Option<u8>,
    text: String,
}

/// Parsed design document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DesignDocument {
    /// Text appearing before the first heading.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub preamble: String,
    pub sections: BTreeMap<SectionKey, String>,
    /// Top-level sections whose heading matched no alias, in document order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub other_sections: Vec<(String, String)>,
}

impl DesignDocument {
    pub fn section(&self, key: SectionKey) -> &str {
        self.sections.get(&key).map(String::as_str).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.preamble.is_empty() && self.sections.is_empty() && self.other_sections.is_empty()
    }

    fn from_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        enum Target {
            Preamble,
            Canonical(SectionKey, u8),
            Other(usize, u8),
        }

        fn push_line(buf: &mut String, line: &str) {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(line);
        }

        let mut doc = DesignDocument::default();
        let mut target = Target::Preamble;

        for block in blocks {
            let text = block.text.trim();
            if text.is_empty() {
                continue;
            }
            match block.heading {
                Some(level) => {
                    if let Some(key) = resolve_section(text) {
                        doc.sections.entry(key).or_default();
                        target = Target::Canonical(key, level);
                        continue;
                    }
                    // An unrecognised sub-heading belongs to the enclosing section.
                    let nested = match target {
                        Target::Canonical(_, l) | Target::Other(_, l) => level > l,
                        Target::Preamble => false,
                    };
                    if nested {
                        match target {
                            Target::Canonical(key, _) => {
                                push_line(doc.sections.entry(key).or_default(), text)
                            }
                            Target::Other(i, _) => push_line(&mut doc.other_sections[i].1, text),
                            Target::Preamble => {}
                        }
                    } else {
                        doc.other_sections.push((text.to_string(), String::new()));
                        target = Target::Other(doc.other_sections.len() - 1, level);
                    }
                }
                None => match target {
                    Target::Preamble => push_line(&mut doc.preamble, text),
                    Target::Canonical(key, _) => push_line(doc.sections.entry(key).or_default(), text),
                    Target::Other(i, _) => push_line(&mut doc.other_sections[i].1, text),
                },
            }
        }
        doc
    }

    /// Parse a Word document.
    pub fn from_docx(bytes: &[u8]) -> Result<Self, ExtractError> {
        let paragraphs = extract_docx_paragraphs(bytes)?;
        Ok(Self::from_blocks(paragraphs.into_iter().map(|p| Block {
            heading: p.heading_level(),
            text: p.text,
        })))
    }

    /// Parse Markdown (ATX `#` headings) or plain text.
    pub fn from_markdown(text: &str) -> Self {
        Self::from_blocks(text.lines().map(|line| {
            let trimmed = line.trim_start();
            let hashes = trimmed.chars().take_while(|c| *c == '#').count();
            if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
                Block {
                    heading: Some(hashes as u8),
                    text: trimmed[hashes..].trim().trim_end_matches('#').trim().to_string(),
                }
            } else {
                Block {
                    heading: None,
                    text: line.to_string(),
                }
            }
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tables
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EstimateColumn {
    Module,
    Task,
    Role,
    Days,
}

const ESTIMATE_COLUMNS: &[(&str, EstimateColumn)] = &[
    ("Module", EstimateColumn::Module),
    ("Component", EstimateColumn::Module),
    ("System", EstimateColumn::Module),
    ("模块", EstimateColumn::Module),
    ("系统模块", EstimateColumn::Module),
    ("Task", EstimateColumn::Task),
    ("Work Item", EstimateColumn::Task),
    ("Feature", EstimateColumn::Task),
    ("Function", EstimateColumn::Task),
    ("Description", EstimateColumn::Task),
    ("功能", EstimateColumn::Task),
    ("任务", EstimateColumn::Task),
    ("Role", EstimateColumn::Role),
    ("Owner", EstimateColumn::Role),
    ("Resource", EstimateColumn::Role),
    ("角色", EstimateColumn::Role),
    ("Days", EstimateColumn::Days),
    ("Effort", EstimateColumn::Days),
    ("Effort (days)", EstimateColumn::Days),
    ("Man-days", EstimateColumn::Days),
    ("Person-days", EstimateColumn::Days),
    ("Estimate", EstimateColumn::Days),
    ("工作量", EstimateColumn::Days),
    ("人天", EstimateColumn::Days),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BacklogColumn {
    Title,
    Description,
    Kind,
    Priority,
    Points,
}

const BACKLOG_COLUMNS: &[(&str, BacklogColumn)] = &[
    ("Title", BacklogColumn::Title),
    ("Summary", BacklogColumn::Title),
    ("Story", BacklogColumn::Title),
    ("User Story", BacklogColumn::Title),
    ("Name", BacklogColumn::Title),
    ("标题", BacklogColumn::Title),
    ("Description", BacklogColumn::Description),
    ("Details", BacklogColumn::Description),
    ("Acceptance Criteria", BacklogColumn::Description),
    ("描述", BacklogColumn::Description),
    ("Type", BacklogColumn::Kind),
    ("Issue Type", BacklogColumn::Kind),
    ("Kind", BacklogColumn::Kind),
    ("类型", BacklogColumn::Kind),
    ("Priority", BacklogColumn::Priority),
    ("优先级", BacklogColumn::Priority),
    ("Story Points", BacklogColumn::Points),
    ("Points", BacklogColumn::Points),
    ("SP", BacklogColumn::Points),
    ("Estimate", BacklogColumn::Points),
    ("故事点", BacklogColumn::Points),
];

fn is_numeric(cell: &str) -> bool {
    parse_number(cell).is_some()
}

fn parse_number(cell: &str) -> Option<f64> {
    let cleaned: String = cell.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Match a header cell against an alias table, exact first, then case- and
/// whitespace-insensitive.
fn match_column<C: Copy>(header: &str, aliases: &[(&str, C)]) -> Option<C> {
    let exact = header.trim();
    if exact.is_empty() {
        return None;
    }
    if let Some((_, c)) = aliases.iter().find(|(a, _)| *a == exact) {
        return Some(*c);
    }
    let loose = exact.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    aliases
        .iter()
        .find(|(a, _)| a.to_lowercase() == loose)
        .map(|(_, c)| *c)
}

/// Locate the header row and map column positions to fields.
///
/// Returns the header row index and the position of each recognised field
/// (first occurrence wins).
fn locate_header<C: Copy + PartialEq>(
    rows: &[Vec<String>],
    aliases: &[(&str, C)],
) -> Option<(usize, Vec<(C, usize)>)> {
    let text_rows = rows.iter().enumerate().filter(|(_, row)| {
        let mut cells = row.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).peekable();
        cells.peek().is_some() && cells.all(|c| !is_numeric(c))
    });

    let mut first_text_row = None;
    for (idx, row) in text_rows {
        let mut mapping: Vec<(C, usize)> = Vec::new();
        for (pos, cell) in row.iter().enumerate() {
            if let Some(col) = match_column(cell, aliases) {
                if !mapping.iter().any(|(c, _)| *c == col) {
                    mapping.push((col, pos));
                }
            }
        }
        if !mapping.is_empty() {
            return Some((idx, mapping));
        }
        first_text_row.get_or_insert(idx);
    }
    first_text_row.map(|idx| (idx, Vec::new()))
}

fn cell<C: PartialEq>(row: &[String], mapping: &[(C, usize)], col: C) -> String {
    mapping
        .iter()
        .find(|(c, _)| *c == col)
        .and_then(|(_, pos)| row.get(*pos))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn is_total_row(label: &str) -> bool {
    let l = label.trim().to_lowercase();
    l.starts_with("total") || l.starts_with("subtotal") || l.starts_with("合计") || l.starts_with("总计")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EstimateRow {
    pub module: String,
    pub task: String,
    pub role: String,
    pub days: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EstimateTable {
    pub rows: Vec<EstimateRow>,
    pub total_days: f64,
}

impl EstimateTable {
    pub fn from_rows(rows: &[Vec<String>]) -> Self {
        let Some((header, mapping)) = locate_header(rows, ESTIMATE_COLUMNS) else {
            return Self::default();
        };
        let mut out = Vec::new();
        for row in &rows[header + 1..] {
            if row.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            let module = cell(row, &mapping, EstimateColumn::Module);
            let task = cell(row, &mapping, EstimateColumn::Task);
            if is_total_row(&module) || is_total_row(&task) {
                continue;
            }
            let days = parse_number(&cell(row, &mapping, EstimateColumn::Days)).unwrap_or(0.0);
            out.push(EstimateRow {
                module,
                task,
                role: cell(row, &mapping, EstimateColumn::Role),
                days,
            });
        }
        let total_days = out.iter().map(|r| r.days).sum();
        Self {
            rows: out,
            total_days,
        }
    }

    /// Distinct module names in first-seen order.
    pub fn modules(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for r in &self.rows {
            if !r.module.is_empty() && !seen.contains(&r.module) {
                seen.push(r.module.clone());
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacklogItem {
    pub title: String,
    pub description: String,
    pub kind: String,
    pub priority: String,
    pub points: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacklogTable {
    pub items: Vec<BacklogItem>,
}

impl BacklogTable {
    pub fn from_rows(rows: &[Vec<String>]) -> Self {
        let Some((header, mapping)) = locate_header(rows, BACKLOG_COLUMNS) else {
            return Self::default();
        };
        let items = rows[header + 1..]
            .iter()
            .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
            .map(|row| BacklogItem {
                title: cell(row, &mapping, BacklogColumn::Title),
                description: cell(row, &mapping, BacklogColumn::Description),
                kind: cell(row, &mapping, BacklogColumn::Kind),
                priority: cell(row, &mapping, BacklogColumn::Priority),
                points: parse_number(&cell(row, &mapping, BacklogColumn::Points)).unwrap_or(0.0),
            })
            .filter(|item| !is_total_row(&item.title))
            .collect();
        Self { items }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Assembly
// ═══════════════════════════════════════════════════════════════════════

/// Parsed artifacts for one selected candidate. Lives only as long as its run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledDocumentSet {
    pub candidate_id: String,
    pub project_name: String,
    /// Position of the candidate in the selection (0 = best).
    pub rank: usize,
    pub design: DesignDocument,
    pub estimate: EstimateTable,
    pub backlog: BacklogTable,
}

/// Result of a batch load: the sets that loaded plus one warning per dropped candidate.
#[derive(Debug, Default)]
pub struct AssembledBatch {
    pub sets: HashMap<String, AssembledDocumentSet>,
    pub warnings: Vec<String>,
}

/// Caps applied when projecting context for a step.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionLimits {
    pub max_section_chars: usize,
    pub max_rows: usize,
}

impl From<&DocumentsConfig> for ProjectionLimits {
    fn from(cfg: &DocumentsConfig) -> Self {
        Self {
            max_section_chars: cfg.max_section_chars,
            max_rows: cfg.max_rows,
        }
    }
}

impl Default for ProjectionLimits {
    fn default() -> Self {
        Self::from(&DocumentsConfig::default())
    }
}

fn extension(handle: &str) -> String {
    Path::new(handle)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn parse_design(handle: &str, bytes: &[u8]) -> Result<DesignDocument> {
    match extension(handle).as_str() {
        "docx" => Ok(DesignDocument::from_docx(bytes)?),
        "md" | "markdown" | "txt" => {
            let text = std::str::from_utf8(bytes)
                .with_context(|| format!("design document is not UTF-8: {}", handle))?;
            Ok(DesignDocument::from_markdown(text))
        }
        other => Err(ExtractError::UnsupportedFormat(format!(".{} ({})", other, handle)).into()),
    }
}

fn parse_workbook(handle: &str, bytes: &[u8]) -> Result<Vec<Vec<String>>> {
    match extension(handle).as_str() {
        "xlsx" => Ok(extract_xlsx_rows(bytes)?),
        other => Err(ExtractError::UnsupportedFormat(format!(".{} ({})", other, handle)).into()),
    }
}

/// Loads and parses documents for selected candidates.
pub struct DocumentAssembler {
    store: Arc<dyn DocumentStore>,
    max_concurrency: usize,
    limits: ProjectionLimits,
}

impl DocumentAssembler {
    pub fn new(store: Arc<dyn DocumentStore>, max_concurrency: usize, limits: ProjectionLimits) -> Self {
        Self {
            store,
            max_concurrency: max_concurrency.max(1),
            limits,
        }
    }

    pub fn limits(&self) -> ProjectionLimits {
        self.limits
    }

    /// Load all artifacts for one candidate. Any referenced file that cannot
    /// be fetched or parsed fails the whole candidate.
    async fn load_one(&self, rank: usize, candidate: &CandidateRecord) -> Result<AssembledDocumentSet> {
        let docs = &candidate.documents;

        let design = match &docs.design {
            Some(handle) => {
                let bytes = self.store.fetch(handle).await?;
                parse_design(handle, &bytes)
                    .with_context(|| format!("Failed to parse design document {}", handle))?
            }
            None => DesignDocument::default(),
        };
        let estimate = match &docs.estimate {
            Some(handle) => {
                let bytes = self.store.fetch(handle).await?;
                let rows = parse_workbook(handle, &bytes)
                    .with_context(|| format!("Failed to parse estimate workbook {}", handle))?;
                EstimateTable::from_rows(&rows)
            }
            None => EstimateTable::default(),
        };
        let backlog = match &docs.backlog {
            Some(handle) => {
                let bytes = self.store.fetch(handle).await?;
                let rows = parse_workbook(handle, &bytes)
                    .with_context(|| format!("Failed to parse backlog workbook {}", handle))?;
                BacklogTable::from_rows(&rows)
            }
            None => BacklogTable::default(),
        };

        Ok(AssembledDocumentSet {
            candidate_id: candidate.id.clone(),
            project_name: candidate.name.clone(),
            rank,
            design,
            estimate,
            backlog,
        })
    }

    /// Load documents for `candidates` concurrently (at most `max_concurrency`
    /// at a time). Failed candidates are omitted and reported in `warnings`.
    pub async fn load(&self, candidates: &[CandidateRecord]) -> AssembledBatch {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let loads = candidates.iter().enumerate().map(|(rank, candidate)| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire_owned().await;
                (candidate, self.load_one(rank, candidate).await)
            }
        });
        let results = futures::future::join_all(loads).await;

        let mut batch = AssembledBatch::default();
        for (candidate, result) in results {
            match result {
                Ok(set) => {
                    batch.sets.insert(candidate.id.clone(), set);
                }
                Err(e) => {
                    tracing::warn!(candidate = %candidate.id, error = %format!("{:#}", e), "document load failed; candidate dropped");
                    batch
                        .warnings
                        .push(format!("documents for candidate {} unavailable: {:#}", candidate.id, e));
                }
            }
        }
        batch
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Projection
// ═══════════════════════════════════════════════════════════════════════

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

fn sections_json(doc: &DesignDocument, keys: &[SectionKey], limits: ProjectionLimits) -> Value {
    let mut map = serde_json::Map::new();
    for key in keys {
        let text = doc.section(*key);
        if !text.is_empty() {
            let name = serde_json::to_value(key)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            map.insert(name, Value::String(truncate_chars(text, limits.max_section_chars)));
        }
    }
    Value::Object(map)
}

fn estimate_json(table: &EstimateTable, limits: ProjectionLimits) -> Value {
    json!({
        "rows": table.rows.iter().take(limits.max_rows).collect::<Vec<_>>(),
        "total_days": table.total_days,
    })
}

/// Build the context a generation step sees, containing only the fields it needs.
///
/// Sets are emitted in selection rank order.
pub fn project(
    step: ArtifactKind,
    sets: &BTreeMap<String, AssembledDocumentSet>,
    limits: ProjectionLimits,
) -> Value {
    let mut ordered: Vec<&AssembledDocumentSet> = sets.values().collect();
    ordered.sort_by_key(|s| s.rank);

    let projects: Vec<Value> = ordered
        .into_iter()
        .map(|set| {
            let body = match step {
                ArtifactKind::ImpactedModules => json!({
                    "sections": sections_json(
                        &set.design,
                        &[SectionKey::Overview, SectionKey::Architecture, SectionKey::Modules, SectionKey::Interfaces],
                        limits,
                    ),
                    "estimated_modules": set.estimate.modules(),
                }),
                ArtifactKind::EffortEstimate => json!({
                    "sections": sections_json(&set.design, &[SectionKey::Scope, SectionKey::Modules], limits),
                    "estimate": estimate_json(&set.estimate, limits),
                }),
                ArtifactKind::DesignDocument => json!({
                    "sections": sections_json(
                        &set.design,
                        &[
                            SectionKey::Overview,
                            SectionKey::Architecture,
                            SectionKey::Modules,
                            SectionKey::DataModel,
                            SectionKey::Interfaces,
                            SectionKey::Security,
                            SectionKey::Risks,
                            SectionKey::Deployment,
                        ],
                        limits,
                    ),
                }),
                ArtifactKind::Backlog => json!({
                    "backlog": set.backlog.items.iter().take(limits.max_rows).collect::<Vec<_>>(),
                    "estimate": estimate_json(&set.estimate, limits),
                }),
            };
            json!({
                "project_id": set.candidate_id,
                "project_name": set.project_name,
                "context": body,
            })
        })
        .collect();

    json!({ "similar_projects": projects })
}
