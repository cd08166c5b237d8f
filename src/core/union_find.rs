// =============================================================================
// UNION-FIND — Classes d'équivalence pour les quotients
// =============================================================================
//
// Utilisé par Σ (identification des lignes poussées) et par les unions
// avec identifications (coégalisateurs des diagrammes `case`).
//
// Compression de chemins + union par rang : quasi-linéaire.
//
// =============================================================================

/// Structure disjoint-set sur les indices `0..len`.
#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn with_len(len: usize) -> Self {
        UnionFind {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    /// Ajoute un singleton et retourne son indice.
    pub fn push(&mut self) -> usize {
        let id = self.parent.len();
        self.parent.push(id);
        self.rank.push(0);
        id
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Représentant de la classe de `x`.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Fusionne les classes de `a` et `b`.
    ///
    /// Retourne `Some((racine, absorbée))` si une fusion a eu lieu.
    pub fn union(&mut self, a: usize, b: usize) -> Option<(usize, usize)> {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return None;
        }
        let (root, child) = if self.rank[ra] < self.rank[rb] { (rb, ra) } else { (ra, rb) };
        self.parent[child] = root;
        if self.rank[root] == self.rank[child] {
            self.rank[root] += 1;
        }
        Some((root, child))
    }

    pub fn same(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }
}
