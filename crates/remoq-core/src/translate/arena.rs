use crate::{
    expr::ast::{LabelDef, LabelRef, ParamDef, ParamRef},
    node::{InstanceId, LabelNode, ParamNode},
    translate::TranslateError,
};
use std::sync::Arc;

///
/// Identity caches
///
/// One logical binding must stay one object across translation. The forward
/// caches key on pointer identity and hand out sequential wire ids; the
/// reverse arenas key on the wire id and rebuild one shared definition per
/// id. Every cache is scoped to a single pass, so ids from different passes
/// never mix. Parameter and label ids are separate namespaces.
///

/// Upper bound on a wire binding id's index. Ids allocate sequentially per
/// pass, so an index beyond the bound indicates a corrupt tree, not a big
/// one.
const MAX_BINDING_INDEX: usize = 1 << 16;

///
/// ParamIds
///
/// Forward cache: first sighting of a parameter definition allocates the
/// next id, later sightings of the same definition reuse it.
///

#[derive(Debug, Default)]
pub struct ParamIds {
    entries: Vec<ParamRef>,
}

impl ParamIds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The wire node for a native parameter reference.
    #[expect(clippy::cast_possible_truncation)]
    pub fn node(&mut self, param: &ParamRef) -> ParamNode {
        let index = self
            .entries
            .iter()
            .position(|known| Arc::ptr_eq(known, param))
            .unwrap_or_else(|| {
                self.entries.push(Arc::clone(param));
                self.entries.len() - 1
            });

        ParamNode {
            id: InstanceId::new(index as u32),
            name: param.name.clone(),
            ty: param.ty.clone(),
        }
    }
}

///
/// LabelIds
///

#[derive(Debug, Default)]
pub struct LabelIds {
    entries: Vec<LabelRef>,
}

impl LabelIds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The wire node for a native jump target.
    #[expect(clippy::cast_possible_truncation)]
    pub fn node(&mut self, label: &LabelRef) -> LabelNode {
        let index = self
            .entries
            .iter()
            .position(|known| Arc::ptr_eq(known, label))
            .unwrap_or_else(|| {
                self.entries.push(Arc::clone(label));
                self.entries.len() - 1
            });

        LabelNode {
            id: InstanceId::new(index as u32),
            name: label.name.clone(),
        }
    }
}

///
/// ParamArena
///
/// Reverse arena: a growable vector indexed by the wire id. First sighting
/// materializes the native definition, later sightings reuse it, so a
/// lambda's parameter list and every reference inside its body end up
/// sharing one allocation.
///

#[derive(Debug, Default)]
pub struct ParamArena {
    slots: Vec<Option<ParamRef>>,
}

impl ParamArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, node: &ParamNode) -> Result<ParamRef, TranslateError> {
        let index = node.id.index();
        if index >= MAX_BINDING_INDEX {
            return Err(TranslateError::BindingRange { id: node.id });
        }
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }

        let slot = &mut self.slots[index];
        if let Some(def) = slot {
            return Ok(Arc::clone(def));
        }

        let def = Arc::new(ParamDef {
            name: node.name.clone(),
            ty: node.ty.clone(),
        });
        *slot = Some(Arc::clone(&def));

        Ok(def)
    }
}

///
/// LabelArena
///

#[derive(Debug, Default)]
pub struct LabelArena {
    slots: Vec<Option<LabelRef>>,
}

impl LabelArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, node: &LabelNode) -> Result<LabelRef, TranslateError> {
        let index = node.id.index();
        if index >= MAX_BINDING_INDEX {
            return Err(TranslateError::BindingRange { id: node.id });
        }
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }

        let slot = &mut self.slots[index];
        if let Some(def) = slot {
            return Ok(Arc::clone(def));
        }

        let def = Arc::new(LabelDef {
            name: node.name.clone(),
        });
        *slot = Some(Arc::clone(&def));

        Ok(def)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_ids_are_sequential_and_pointer_keyed() {
        let mut ids = ParamIds::new();
        let x = ParamDef::fresh("x");
        let y = ParamDef::fresh("y");

        assert_eq!(ids.node(&x).id, InstanceId::new(0));
        assert_eq!(ids.node(&y).id, InstanceId::new(1));
        // same definition, same id
        assert_eq!(ids.node(&x).id, InstanceId::new(0));
    }

    #[test]
    fn equal_but_distinct_definitions_get_distinct_ids() {
        let mut ids = ParamIds::new();
        let a = ParamDef::fresh("x");
        let b = ParamDef::fresh("x");

        assert_ne!(ids.node(&a).id, ids.node(&b).id);
    }

    #[test]
    fn reverse_reuses_one_definition_per_id() {
        let mut arena = ParamArena::new();
        let node = ParamNode {
            id: InstanceId::new(0),
            name: "x".into(),
            ty: None,
        };

        let first = arena.resolve(&node).unwrap();
        let second = arena.resolve(&node).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn out_of_range_id_is_rejected() {
        let mut arena = LabelArena::new();
        let node = LabelNode {
            id: InstanceId::new(u32::MAX),
            name: None,
        };

        let err = arena.resolve(&node).unwrap_err();
        assert!(matches!(err, TranslateError::BindingRange { .. }));
    }

    #[test]
    fn label_ids_share_the_forward_scheme() {
        let mut ids = LabelIds::new();
        let exit = LabelDef::named("exit");
        let again = LabelDef::anonymous();

        assert_eq!(ids.node(&exit).id, InstanceId::new(0));
        assert_eq!(ids.node(&again).id, InstanceId::new(1));
        assert_eq!(ids.node(&exit).id, InstanceId::new(0));
        assert_eq!(ids.node(&exit).name.as_deref(), Some("exit"));
    }
}
