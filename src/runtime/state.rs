//! Per-conversion traversal state
//!
//! One `TraversalState` lives for exactly one top-level conversion call. It
//! bounds nesting depth and, when references are preserved, remembers every
//! object identity already expanded so shared or cyclic data expands once.
//! Both outcomes are silent: the member is left at its default.

use std::collections::HashSet;

/// Outcome of asking to expand a single-valued nested member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Expand; depth was incremented and must be restored with
    /// [`TraversalState::ascend`]
    Expand,
    /// Past the depth bound
    Truncated,
    /// Identity already expanded during this conversion
    AlreadyVisited,
}

#[derive(Debug, Clone)]
pub struct TraversalState {
    depth: u32,
    visited: HashSet<usize>,
    max_depth: u32,
    preserve_references: bool,
}

impl TraversalState {
    /// `max_depth` 0 means unbounded
    pub fn new(max_depth: u32, preserve_references: bool) -> Self {
        Self {
            depth: 0,
            visited: HashSet::new(),
            max_depth,
            preserve_references,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn preserve_references(&self) -> bool {
        self.preserve_references
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Record the root object of the conversion
    pub fn visit_root(&mut self, id: usize) {
        if self.preserve_references {
            self.visited.insert(id);
        }
    }

    /// Would one more level exceed the bound?
    pub fn exceeds_bound(&self) -> bool {
        self.max_depth != 0 && self.depth + 1 > self.max_depth
    }

    /// Enter a nested member; false (and no change) past the bound
    pub fn try_descend(&mut self) -> bool {
        if self.exceeds_bound() {
            return false;
        }
        self.depth += 1;
        true
    }

    pub fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// True on the first sighting of an identity, and always when references
    /// are not preserved
    pub fn first_visit(&mut self, id: usize) -> bool {
        !self.preserve_references || self.visited.insert(id)
    }

    /// Depth check, then identity check
    pub fn admit(&mut self, id: usize) -> Admission {
        if !self.try_descend() {
            return Admission::Truncated;
        }
        if !self.first_visit(id) {
            self.ascend();
            return Admission::AlreadyVisited;
        }
        Admission::Expand
    }

    /// Expand one nested object through `convert`; `None` when the depth
    /// bound or the visited set declines it
    pub fn expand<S, T, E>(
        &mut self,
        source: &S,
        convert: impl FnOnce(&S, &mut Self) -> Result<T, E>,
    ) -> Result<Option<T>, E> {
        match self.admit(address_of(source)) {
            Admission::Expand => {
                let result = convert(source, self);
                self.ascend();
                result.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Expand every element of a nested collection one level down; elements
    /// already visited are skipped and past the bound the result is empty
    pub fn expand_each<'a, S: 'a, T, E>(
        &mut self,
        items: impl IntoIterator<Item = &'a S>,
        mut convert: impl FnMut(&S, &mut Self) -> Result<T, E>,
    ) -> Result<Vec<T>, E> {
        if !self.try_descend() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for item in items {
            if !self.first_visit(address_of(item)) {
                continue;
            }
            match convert(item, self) {
                Ok(value) => out.push(value),
                Err(e) => {
                    self.ascend();
                    return Err(e);
                }
            }
        }
        self.ascend();
        Ok(out)
    }

    /// [`expand_each`](Self::expand_each) for collections with null
    /// elements, which are kept as `None`
    pub fn expand_each_nullable<'a, S: 'a, T, E>(
        &mut self,
        items: impl IntoIterator<Item = Option<&'a S>>,
        mut convert: impl FnMut(&S, &mut Self) -> Result<T, E>,
    ) -> Result<Vec<Option<T>>, E> {
        if !self.try_descend() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for item in items {
            let Some(item) = item else {
                out.push(None);
                continue;
            };
            if !self.first_visit(address_of(item)) {
                continue;
            }
            match convert(item, self) {
                Ok(value) => out.push(Some(value)),
                Err(e) => {
                    self.ascend();
                    return Err(e);
                }
            }
        }
        self.ascend();
        Ok(out)
    }
}

/// Identity of a borrowed object: its address
pub fn address_of<S>(value: &S) -> usize {
    value as *const S as usize
}
