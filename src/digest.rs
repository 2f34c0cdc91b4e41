//! Input digest computation: a wire-bit-stable SHA-256 over the root
//! manifest's constraint-relevant fields, stable under permutation of
//! dependency/override/ignored entries.

use sha2::{Digest, Sha256};

use crate::manifest::Manifest;

/// Canonicalizes `manifest` and returns the raw 32-byte digest.
///
/// Dependencies, test-dependencies, overrides and ignored paths are sorted
/// lexicographically by project root (ignored paths by the path itself)
/// before hashing, so the result does not depend on the order entries were
/// declared in.
pub fn input_digest(manifest: &Manifest) -> [u8; 32] {
    let mut hasher = Sha256::new();

    hash_constraint_map(&mut hasher, "dep", &manifest.dependencies);
    hash_constraint_map(&mut hasher, "test-dep", &manifest.test_dependencies);
    hash_constraint_map(&mut hasher, "override", &manifest.overrides);

    for (root, source) in &manifest.dependency_sources {
        hasher.update(b"source:");
        hasher.update(root.0.as_bytes());
        hasher.update(b"=");
        hasher.update(source.0.as_str().as_bytes());
        hasher.update(b"\n");
    }

    let mut required = manifest.required.clone();
    required.sort();
    for r in &required {
        hasher.update(b"required:");
        hasher.update(r.as_bytes());
        hasher.update(b"\n");
    }

    let mut ignored = manifest.ignored.clone();
    ignored.sort();
    for i in &ignored {
        hasher.update(b"ignored:");
        hasher.update(i.as_bytes());
        hasher.update(b"\n");
    }

    hasher.finalize().into()
}

fn hash_constraint_map(
    hasher: &mut Sha256,
    label: &str,
    map: &std::collections::BTreeMap<crate::identifier::ProjectRoot, crate::version::Constraint>,
) {
    // BTreeMap already iterates in sorted key order, giving permutation
    // stability for free regardless of insertion order.
    for (root, constraint) in map {
        hasher.update(label.as_bytes());
        hasher.update(b":");
        hasher.update(root.0.as_bytes());
        hasher.update(b"=");
        hasher.update(constraint.canonical_form().as_bytes());
        hasher.update(b"\n");
    }
}
