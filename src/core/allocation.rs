//! Per-run allocation of prompts and reference assets to groups
//!
//! The plan is computed once before any task executes and persisted with the
//! run state, so a resumed run replays exactly the same assignments instead
//! of re-rolling them.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::config::TemplateConfig;
use crate::core::selection;
use crate::error::{GeneratorError, GeneratorResult};
use crate::models::GenerationMode;

/// Immutable per-run assignment decisions, one entry per group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub groups: Vec<GroupAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAssignment {
    /// Prompt file assigned to this group; None only when no prompt pool and
    /// no specified prompt exist (the inline template takes over then).
    pub prompt: Option<PathBuf>,
    /// Reference asset for transfer mode; always None in scene mode.
    pub reference: Option<PathBuf>,
    /// Whether this group consumes the user-specified product images.
    pub use_specified_products: bool,
}

/// Number of leading groups covered by user-pinned selections.
///
/// Ceiling, not floor: `coverage_percent=34, group_count=5` covers 2 groups,
/// and any non-zero percentage covers at least one group.
pub fn coverage_groups(group_count: usize, coverage_percent: u32) -> usize {
    (group_count * coverage_percent as usize).div_ceil(100)
}

pub struct AllocationPlanner;

impl AllocationPlanner {
    /// Build the full plan for a run.
    ///
    /// Unknown user-specified identifiers fail the whole run here, before
    /// anything is dispatched.
    pub fn plan<R: Rng>(
        template: &TemplateConfig,
        prompts: &[PathBuf],
        references: &[PathBuf],
        rng: &mut R,
    ) -> GeneratorResult<AllocationPlan> {
        let group_count = template.group_count;

        let prompt_assignments = match template.mode {
            GenerationMode::SceneGeneration => {
                let specified = resolve_specified_prompts(template, prompts)?;
                allocate_scene_prompts(prompts, &specified, group_count, rng)
            }
            GenerationMode::SubjectTransfer => {
                let shared = allocate_transfer_prompt(template, prompts, rng);
                if let Some(prompt) = &shared {
                    tracing::info!(
                        "📝 transfer mode: all groups share prompt {}",
                        prompt.display()
                    );
                }
                vec![shared; group_count]
            }
        };

        let reference_assignments = allocate_references(template, references, group_count)?;

        let product_coverage =
            coverage_groups(group_count, template.product_images.specified_coverage);

        let groups = prompt_assignments
            .into_iter()
            .zip(reference_assignments)
            .enumerate()
            .map(|(index, (prompt, reference))| GroupAssignment {
                prompt,
                reference,
                use_specified_products: index < product_coverage,
            })
            .collect();

        Ok(AllocationPlan { groups })
    }
}

fn resolve_specified_prompts(
    template: &TemplateConfig,
    prompts: &[PathBuf],
) -> GeneratorResult<Vec<PathBuf>> {
    let specified = &template.prompts.specified_prompts;
    if specified.is_empty() {
        return Ok(Vec::new());
    }
    selection::validate_specified(specified, prompts)
        .map_err(|errors| GeneratorError::config(format!("specified prompts: {}", errors.join("; "))))
}

/// Scene mode: distinct prompts per group. Specified prompts are consumed
/// first in order; the rest draw randomly from the unused pool; once the pool
/// is exhausted, reuse begins but a group never repeats its predecessor's
/// prompt unless only one prompt exists.
fn allocate_scene_prompts<R: Rng>(
    prompts: &[PathBuf],
    specified: &[PathBuf],
    group_count: usize,
    rng: &mut R,
) -> Vec<Option<PathBuf>> {
    let mut assignments: Vec<Option<PathBuf>> = Vec::with_capacity(group_count);
    let mut used: HashSet<PathBuf> = HashSet::new();

    for index in 0..group_count {
        let previous = assignments.last().cloned().flatten();

        let selected = if index < specified.len() {
            Some(specified[index].clone())
        } else {
            let unused: Vec<&PathBuf> = prompts.iter().filter(|p| !used.contains(*p)).collect();
            if let Some(choice) = unused.choose(rng) {
                Some((*choice).clone())
            } else if prompts.is_empty() {
                None
            } else {
                let candidates: Vec<&PathBuf> = prompts
                    .iter()
                    .filter(|p| previous.as_ref() != Some(*p))
                    .collect();
                match candidates.choose(rng) {
                    Some(choice) => Some((*choice).clone()),
                    None => Some(prompts[0].clone()),
                }
            }
        };

        if let Some(path) = &selected {
            used.insert(path.clone());
        }
        assignments.push(selected);
    }

    assignments
}

/// Transfer mode: one prompt shared by every group — the specified one when
/// it resolves, otherwise a uniform random draw.
fn allocate_transfer_prompt<R: Rng>(
    template: &TemplateConfig,
    prompts: &[PathBuf],
    rng: &mut R,
) -> Option<PathBuf> {
    if let Some(spec) = &template.prompts.specified_prompt {
        if let Some(found) = selection::find_by_spec(prompts, spec) {
            return Some(found);
        }
        tracing::warn!("⚠️ specified prompt not found: {}, drawing at random", spec);
    }
    prompts.choose(rng).cloned()
}

/// Reference assets are assigned in ascending order with wraparound; a
/// user-pinned asset claims the covered leading groups first.
fn allocate_references(
    template: &TemplateConfig,
    references: &[PathBuf],
    group_count: usize,
) -> GeneratorResult<Vec<Option<PathBuf>>> {
    if template.mode != GenerationMode::SubjectTransfer {
        return Ok(vec![None; group_count]);
    }
    if references.is_empty() {
        return Err(GeneratorError::allocation(
            "subject_transfer mode requires at least one reference asset",
        ));
    }

    let reference_cfg = template.reference_images.as_ref();
    let pinned = match reference_cfg.and_then(|cfg| cfg.specified_images.first()) {
        Some(spec) => Some(selection::find_by_spec(references, spec).ok_or_else(|| {
            GeneratorError::config(format!("specified reference asset not found: {}", spec))
        })?),
        None => None,
    };
    let coverage = coverage_groups(
        group_count,
        reference_cfg.map(|cfg| cfg.specified_coverage).unwrap_or(100),
    );

    let mut assignments = Vec::with_capacity(group_count);
    let mut cursor = 0usize;
    for index in 0..group_count {
        if let Some(pin) = &pinned {
            if index < coverage {
                assignments.push(Some(pin.clone()));
                continue;
            }
        }
        assignments.push(Some(references[cursor % references.len()].clone()));
        cursor += 1;
    }
    Ok(assignments)
}
