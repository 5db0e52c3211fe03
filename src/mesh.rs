use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, PoisonError};

/// Vertex capacity above which a pooled mesh counts as "large".
const LARGE_MESH_CAPACITY: usize = 10 * 1024;

/// Geometry buffer produced by element builders.
///
/// Uses only primitive buffers so the content can be handed to host
/// bindings without conversion. Vertices are `(x, y, z)` triples where `x`
/// is longitude, `y` latitude and `z` elevation.
#[derive(Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<f64>,
    pub triangles: Vec<i32>,
    pub colors: Vec<i32>,
    pub uvs: Vec<f64>,
    pub uv_map: Vec<i32>,
}

impl Mesh {
    /// Creates a named mesh with pre-reserved buffers.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vertices: Vec::with_capacity(4096),
            triangles: Vec::with_capacity(4096),
            colors: Vec::with_capacity(4096),
            uvs: Vec::with_capacity(4096),
            uv_map: Vec::with_capacity(128),
        }
    }

    /// Empties the geometry buffers, keeping their capacity and the name.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.triangles.clear();
        self.colors.clear();
        self.uvs.clear();
        self.uv_map.clear();
    }

    /// A mesh without vertices carries no geometry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Capacity-tiered free list of meshes.
///
/// Large per-tile allocations dominate build cost, so builders take meshes
/// from the pool and return them once the content has been delivered.
#[derive(Default)]
pub struct MeshPool {
    tiers: Mutex<BTreeMap<usize, Vec<Mesh>>>,
}

impl MeshPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the pooled mesh with the smallest capacity, or allocates a
    /// fresh one.
    #[must_use]
    pub fn get_small(&self, name: &str) -> Mesh {
        self.take(name, Bound::Unbounded)
    }

    /// Takes a pooled mesh whose capacity exceeds the large threshold, or
    /// allocates a fresh one.
    #[must_use]
    pub fn get_large(&self, name: &str) -> Mesh {
        self.take(name, Bound::Excluded(LARGE_MESH_CAPACITY))
    }

    /// Clears a mesh and returns it to the pool keyed by its current
    /// vertex capacity.
    pub fn release(&self, mut mesh: Mesh) {
        mesh.clear();
        let mut tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);
        tiers.entry(mesh.vertices.capacity()).or_default().push(mesh);
    }

    fn take(&self, name: &str, lower: Bound<usize>) -> Mesh {
        let mut tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);
        let tier = tiers
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(&capacity, _)| capacity);
        let Some(capacity) = tier else {
            return Mesh::new(name);
        };

        let meshes = tiers.get_mut(&capacity);
        let mut mesh = match meshes.and_then(Vec::pop) {
            Some(mesh) => mesh,
            None => return Mesh::new(name),
        };
        if tiers.get(&capacity).is_some_and(Vec::is_empty) {
            tiers.remove(&capacity);
        }
        mesh.name = name.to_string();
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::{LARGE_MESH_CAPACITY, Mesh, MeshPool};

    fn mesh_with_capacity(capacity: usize) -> Mesh {
        let mut mesh = Mesh::default();
        mesh.vertices.reserve_exact(capacity);
        mesh
    }

    #[test]
    fn clear_keeps_capacity_and_name() {
        let mut mesh = Mesh::new("terrain");
        mesh.vertices.extend([1.0, 2.0, 3.0]);
        let capacity = mesh.vertices.capacity();

        mesh.clear();

        assert!(mesh.is_empty());
        assert_eq!(mesh.name, "terrain");
        assert_eq!(mesh.vertices.capacity(), capacity);
    }

    #[test]
    fn small_request_pops_smallest_tier() {
        let pool = MeshPool::new();
        pool.release(mesh_with_capacity(64));
        pool.release(mesh_with_capacity(LARGE_MESH_CAPACITY * 2));

        let mesh = pool.get_small("small");
        assert_eq!(mesh.vertices.capacity(), 64);
        assert_eq!(mesh.name, "small");
    }

    #[test]
    fn large_request_skips_small_tiers() {
        let pool = MeshPool::new();
        pool.release(mesh_with_capacity(64));
        pool.release(mesh_with_capacity(LARGE_MESH_CAPACITY * 2));

        let mesh = pool.get_large("large");
        assert!(mesh.vertices.capacity() > LARGE_MESH_CAPACITY);

        // Only the small mesh is left, so the next large request allocates.
        let fresh = pool.get_large("fresh");
        assert_eq!(fresh.vertices.capacity(), 4096);
    }

    #[test]
    fn threshold_capacity_does_not_count_as_large() {
        let pool = MeshPool::new();
        pool.release(mesh_with_capacity(LARGE_MESH_CAPACITY));

        let mesh = pool.get_large("large");
        assert_eq!(mesh.vertices.capacity(), 4096);
    }

    #[test]
    fn released_mesh_comes_back_empty() {
        let pool = MeshPool::new();
        let mut mesh = pool.get_small("a");
        mesh.vertices.extend([1.0, 2.0, 3.0]);
        pool.release(mesh);

        let mesh = pool.get_small("b");
        assert!(mesh.is_empty());
    }
}
