//! Eager synthesizer
//!
//! Lowers a [`GenerationModel`] into step lists: one forward
//! [`ConversionRoutine`] per facet and, where a reverse is generated, one
//! [`ReverseRoutine`]. The interpreter in [`crate::runtime`] executes these
//! and the Rust renderer emits code from them, so both agree on order,
//! guards and null handling.

use crate::model::{FacetShape, GenerationModel, ResolvedMember};
use crate::schema::{EnumProjection, HookRef};
use crate::select::MemberOrigin;
use crate::typeref::{CollectionShape, TypeRef};
use serde::Serialize;
use std::collections::BTreeMap;

/// How an assignment turns the value read from the source into the
/// member's value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Produce {
    Copy,
    Compute { expression: String },
    EnumCast { target: EnumProjection },
    Nested {
        facet: String,
        collection: Option<CollectionShape>,
    },
}

/// One member assignment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub member: String,
    /// Source path read before producing; empty for computed members
    pub path: Vec<String>,
    /// A null anywhere on the path yields null instead of a fault
    pub null_yields_null: bool,
    /// CEL predicates, all must hold
    pub guard: Vec<String>,
    pub produce: Produce,
    pub target_type: TypeRef,
}

impl Assignment {
    pub fn path_text(&self) -> String {
        self.path.join(".")
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.produce, Produce::Nested { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Step {
    BeforeHook(HookRef),
    Assign(Assignment),
    AfterHook(HookRef),
}

/// Forward conversion of one facet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionRoutine {
    pub facet: String,
    pub source_type: String,
    pub steps: Vec<Step>,
    pub is_async: bool,
}

impl ConversionRoutine {
    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.steps.iter().filter_map(|step| match step {
            Step::Assign(a) => Some(a),
            _ => None,
        })
    }
}

/// How a facet member is written back onto the source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Restore {
    Copy,
    EnumParse {
        enum_name: String,
        from: EnumProjection,
    },
    Nested {
        facet: String,
        collection: Option<CollectionShape>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteBack {
    pub member: String,
    /// Source member written
    pub target: String,
    /// Declared type of the source member
    pub target_type: TypeRef,
    pub restore: Restore,
}

/// Reverse conversion of one facet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReverseRoutine {
    pub facet: String,
    pub source_type: String,
    pub writes: Vec<WriteBack>,
    /// Facet members that are not written back
    pub skipped: Vec<String>,
}

/// Routines for every facet of a model
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EagerPlan {
    pub forward: BTreeMap<String, ConversionRoutine>,
    pub reverse: BTreeMap<String, ReverseRoutine>,
}

impl EagerPlan {
    pub fn forward(&self, facet: &str) -> Option<&ConversionRoutine> {
        self.forward.get(facet)
    }

    pub fn reverse(&self, facet: &str) -> Option<&ReverseRoutine> {
        self.reverse.get(facet)
    }
}

/// Lower every facet of the model
pub fn synthesize(model: &GenerationModel) -> EagerPlan {
    let mut plan = EagerPlan::default();
    for facet in model.facets() {
        plan.forward
            .insert(facet.name.clone(), forward_routine(facet));
        if facet.generate_reverse {
            plan.reverse
                .insert(facet.name.clone(), reverse_routine(model, facet));
        }
    }
    plan
}

/// Forward routine: before hook, assignments in member order, after hook
pub fn forward_routine(facet: &FacetShape) -> ConversionRoutine {
    let mut steps = Vec::with_capacity(facet.members.len() + 2);
    if let Some(hook) = &facet.before_hook {
        steps.push(Step::BeforeHook(hook.clone()));
    }
    for member in &facet.members {
        steps.push(Step::Assign(assignment(member)));
    }
    if let Some(hook) = &facet.after_hook {
        steps.push(Step::AfterHook(hook.clone()));
    }
    ConversionRoutine {
        facet: facet.name.clone(),
        source_type: facet.source.clone(),
        steps,
        is_async: facet.is_async(),
    }
}

fn assignment(member: &ResolvedMember) -> Assignment {
    let path = match &member.origin {
        MemberOrigin::Direct { member } => vec![member.clone()],
        MemberOrigin::Path { segments } => segments.clone(),
        MemberOrigin::Computed { .. } => Vec::new(),
    };
    let produce = match (&member.origin, &member.nested, member.enum_as) {
        (MemberOrigin::Computed { expression, .. }, _, _) => Produce::Compute {
            expression: expression.clone(),
        },
        (_, Some(binding), _) => Produce::Nested {
            facet: binding.bound_facet.clone(),
            collection: binding.collection_shape,
        },
        (_, None, Some(target)) => Produce::EnumCast { target },
        (_, None, None) => Produce::Copy,
    };
    Assignment {
        member: member.name.clone(),
        path,
        null_yields_null: member.facet_type.is_nullable(),
        guard: member.conditions.clone(),
        produce,
        target_type: member.facet_type.clone(),
    }
}

/// Reverse routine: reversible members only, everything else stays at the
/// source type's default
pub fn reverse_routine(model: &GenerationModel, facet: &FacetShape) -> ReverseRoutine {
    let mut writes = Vec::new();
    let mut skipped = Vec::new();

    for member in &facet.members {
        let target = match member.write_target() {
            Some(target) if member.reversible => target,
            _ => {
                skipped.push(member.name.clone());
                continue;
            }
        };
        let target_type = model
            .sources
            .members(&facet.source)
            .and_then(|members| members.iter().find(|m| m.name == target))
            .map(|m| m.declared_type.clone())
            .unwrap_or_else(|| member.source_type.clone());

        let restore = match (&member.nested, member.enum_as) {
            (Some(binding), _) => Restore::Nested {
                facet: binding.bound_facet.clone(),
                collection: target_type.collection_shape(),
            },
            (None, Some(from)) => Restore::EnumParse {
                enum_name: target_type.target_name().unwrap_or_default().to_string(),
                from,
            },
            (None, None) => Restore::Copy,
        };
        writes.push(WriteBack {
            member: member.name.clone(),
            target: target.to_string(),
            target_type,
            restore,
        });
    }

    ReverseRoutine {
        facet: facet.name.clone(),
        source_type: facet.source.clone(),
        writes,
        skipped,
    }
}
