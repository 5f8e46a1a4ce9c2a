//! Keep markers: entities the optimizer must not change structurally.
//!
//! A kept class is never made `final` and never retargeted or removed as an interface; a
//! kept method is never made `private`, and its invocations are never treated as free of
//! side effects. The markers live in a side table owned by the caller rather than on the
//! class model.

use rustc_hash::FxHashSet;

/// Side table of kept classes and members.
#[derive(Debug, Clone, Default)]
pub struct KeepMarker {
    classes: FxHashSet<String>,
    members: FxHashSet<(String, String, String)>,
    all_members: FxHashSet<String>,
}

impl KeepMarker {
    /// Creates an empty marker table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the class `name` itself.
    pub fn keep_class(&mut self, name: &str) -> &mut Self {
        self.classes.insert(name.to_string());
        self
    }

    /// Keeps the class `name` and every member it declares.
    pub fn keep_class_and_members(&mut self, name: &str) -> &mut Self {
        self.classes.insert(name.to_string());
        self.all_members.insert(name.to_string());
        self
    }

    /// Keeps one member.
    pub fn keep_member(&mut self, class: &str, name: &str, descriptor: &str) -> &mut Self {
        self.members
            .insert((class.to_string(), name.to_string(), descriptor.to_string()));
        self
    }

    /// Returns `true` if the class is kept.
    #[must_use]
    pub fn is_class_kept(&self, name: &str) -> bool {
        self.classes.contains(name)
    }

    /// Returns `true` if the member is kept, directly or through its class.
    #[must_use]
    pub fn is_member_kept(&self, class: &str, name: &str, descriptor: &str) -> bool {
        self.all_members.contains(class)
            || self
                .members
                .contains(&(class.to_string(), name.to_string(), descriptor.to_string()))
    }

    /// Number of kept classes and members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len() + self.members.len()
    }

    /// Returns `true` if nothing is kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_are_kept_through_their_class() {
        let mut keep = KeepMarker::new();
        keep.keep_class("a/Api")
            .keep_class_and_members("a/Entry")
            .keep_member("a/Util", "run", "()V");

        assert!(keep.is_class_kept("a/Api"));
        assert!(!keep.is_member_kept("a/Api", "run", "()V"));
        assert!(keep.is_member_kept("a/Entry", "main", "([Ljava/lang/String;)V"));
        assert!(keep.is_member_kept("a/Util", "run", "()V"));
        assert!(!keep.is_class_kept("a/Util"));
        assert_eq!(keep.len(), 3);
    }
}
