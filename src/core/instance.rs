// =============================================================================
// INSTANCE — Un foncteur Schema → Set (les données concrètes)
// =============================================================================
//
// Une INSTANCE d'un Schema S est un FONCTEUR I : S → Set :
//   - pour chaque ENTITÉ, un ensemble fini de lignes (RowId opaques)
//   - pour chaque FK, une fonction TOTALE entre ensembles de lignes
//   - pour chaque ATTRIBUT, une fonction TOTALE vers des valeurs brutes
//
//   Instance:
//     Employee   = { 1, 2, 3 }
//     Department = { 1, 2 }
//     works_in(1) = 1, works_in(2) = 1, works_in(3) = 2
//     emp_name(1) = "Alice", ...
//
// PROPRIÉTÉ FONCTORIELLE : suivre un chemin = composer les fonctions.
//   I(g∘f) = I(g) ∘ I(f)  → `follow_path` est un simple fold.
//
// Les lignes produites par une requête (jointure ou union) gardent leur
// PROVENANCE (`RowLabel`) : le tuple nommé des lignes qui les composent.
// C'est ce qui permet la vue tabulaire des résultats.
//
// Une instance est un conteneur mutable, mais seulement pour le moteur qui
// la produit, ou pour l'appelant via `coproduct_in_place` (migrate_into).
//
// =============================================================================

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::{MigrateError, MigrateResult};
use super::schema::{Path, Schema};
use super::typeside::Value;

/// Identifiant d'une ligne, unique au sein de son entité.
pub type RowId = u64;

/// Une composante d'une ligne produite par requête : la ligne `row` de
/// l'entité `entity`, liée au sommet `vertex` du diagramme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Component {
    pub vertex: String,
    pub entity: String,
    pub row: RowId,
}

/// Provenance d'une ligne produite par une requête.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowLabel {
    /// Ligne d'une jointure : une composante par sommet du diagramme.
    Tuple(Vec<Component>),
    /// Ligne d'une union : le cas (sommet) qui l'a produite.
    Case(Component),
}

/// Les données d'une entité : ses lignes et leurs images par les FK/attributs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityData {
    /// Compteur pour générer les RowId auto-incrémentés
    next_id: RowId,
    /// row_id → (attr_name → Value). Toute ligne existante a une entrée.
    pub attribute_values: BTreeMap<RowId, BTreeMap<String, Value>>,
    /// row_id → (fk_name → RowId cible)
    pub fk_values: BTreeMap<RowId, BTreeMap<String, RowId>>,
    /// Provenance des lignes produites par une requête
    #[serde(default)]
    pub labels: BTreeMap<RowId, RowLabel>,
}

impl Default for EntityData {
    fn default() -> Self {
        Self::new()
    }
}

// Le compteur interne ne fait pas partie de l'identité des données.
impl PartialEq for EntityData {
    fn eq(&self, other: &Self) -> bool {
        self.attribute_values == other.attribute_values
            && self.fk_values == other.fk_values
            && self.labels == other.labels
    }
}

impl EntityData {
    pub fn new() -> Self {
        EntityData {
            next_id: 1,
            attribute_values: BTreeMap::new(),
            fk_values: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Insère une nouvelle ligne. Retourne le RowId attribué.
    pub fn insert(
        &mut self,
        attrs: impl IntoIterator<Item = (String, Value)>,
        fks: impl IntoIterator<Item = (String, RowId)>,
    ) -> RowId {
        let id = self.next_id;
        self.insert_with_id(id, attrs, fks);
        id
    }

    /// Insère une ligne avec un RowId imposé (utile pour les migrations).
    pub fn insert_with_id(
        &mut self,
        id: RowId,
        attrs: impl IntoIterator<Item = (String, Value)>,
        fks: impl IntoIterator<Item = (String, RowId)>,
    ) {
        if id >= self.next_id {
            self.next_id = id + 1;
        }
        self.attribute_values.insert(id, attrs.into_iter().collect());
        self.fk_values.insert(id, fks.into_iter().collect());
    }

    /// Réserve une ligne vide ; ses FK/attributs sont remplis ensuite.
    pub fn push_row(&mut self) -> RowId {
        self.insert(std::iter::empty(), std::iter::empty())
    }

    pub fn set_fk(&mut self, row: RowId, fk_name: &str, target: RowId) {
        self.fk_values.entry(row).or_default().insert(fk_name.to_string(), target);
    }

    pub fn set_attr(&mut self, row: RowId, attr_name: &str, value: Value) {
        self.attribute_values.entry(row).or_default().insert(attr_name.to_string(), value);
    }

    pub fn set_label(&mut self, row: RowId, label: RowLabel) {
        self.labels.insert(row, label);
    }

    pub fn len(&self) -> usize {
        self.attribute_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attribute_values.is_empty()
    }

    pub fn contains(&self, row: RowId) -> bool {
        self.attribute_values.contains_key(&row)
    }

    /// Tous les RowId, en ordre croissant
    pub fn row_ids(&self) -> Vec<RowId> {
        self.attribute_values.keys().copied().collect()
    }

    /// Le plus grand RowId jamais attribué (0 si aucun)
    pub fn max_id(&self) -> RowId {
        self.next_id - 1
    }

    pub fn get_attr(&self, row_id: RowId, attr_name: &str) -> Option<&Value> {
        self.attribute_values
            .get(&row_id)
            .and_then(|attrs| attrs.get(attr_name))
    }

    pub fn get_fk(&self, row_id: RowId, fk_name: &str) -> Option<RowId> {
        self.fk_values
            .get(&row_id)
            .and_then(|fks| fks.get(fk_name))
            .copied()
    }

    pub fn label(&self, row_id: RowId) -> Option<&RowLabel> {
        self.labels.get(&row_id)
    }
}

/// Instance complète : un foncteur Schema → Set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub schema_name: String,
    /// Données par entité, dans l'ordre du schéma
    pub data: IndexMap<String, EntityData>,
}

/// Deux instances sont égales si elles ont le même schéma et les mêmes
/// données ; le nom n'est qu'une étiquette.
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.schema_name == other.schema_name && self.data == other.data
    }
}

impl Instance {
    /// Crée une instance vide pour un schéma donné
    pub fn new(name: &str, schema: &Schema) -> Self {
        let data = schema.nodes.keys()
            .map(|node_name| (node_name.clone(), EntityData::new()))
            .collect();
        Instance {
            name: name.to_string(),
            schema_name: schema.name.clone(),
            data,
        }
    }

    /// Insère une ligne dans une entité. Retourne le RowId attribué.
    pub fn insert(
        &mut self,
        entity: &str,
        attrs: impl IntoIterator<Item = (String, Value)>,
        fks: impl IntoIterator<Item = (String, RowId)>,
    ) -> MigrateResult<RowId> {
        Ok(self.entity_mut(entity)?.insert(attrs, fks))
    }

    pub fn entity(&self, entity: &str) -> MigrateResult<&EntityData> {
        self.data.get(entity).ok_or_else(|| {
            MigrateError::SchemaMismatch(format!(
                "entity '{}' does not exist in instance '{}'",
                entity, self.name
            ))
        })
    }

    pub fn entity_mut(&mut self, entity: &str) -> MigrateResult<&mut EntityData> {
        let name = &self.name;
        self.data.get_mut(entity).ok_or_else(|| {
            MigrateError::SchemaMismatch(format!(
                "entity '{}' does not exist in instance '{}'",
                entity, name
            ))
        })
    }

    /// Nombre de lignes d'une entité (0 si elle n'existe pas)
    pub fn row_count(&self, entity: &str) -> usize {
        self.data.get(entity).map_or(0, |ed| ed.len())
    }

    /// Image d'une ligne par une FK. La fonction doit être totale.
    pub fn fk_value(&self, entity: &str, row: RowId, fk_name: &str) -> MigrateResult<RowId> {
        self.entity(entity)?
            .get_fk(row, fk_name)
            .ok_or_else(|| MigrateError::MissingValue {
                entity: entity.to_string(),
                row,
                edge: fk_name.to_string(),
            })
    }

    /// Image d'une ligne par un attribut. La fonction doit être totale.
    pub fn attr_value(&self, entity: &str, row: RowId, attr_name: &str) -> MigrateResult<&Value> {
        self.entity(entity)?
            .get_attr(row, attr_name)
            .ok_or_else(|| MigrateError::MissingValue {
                entity: entity.to_string(),
                row,
                edge: attr_name.to_string(),
            })
    }

    /// Évalue un chemin de FK depuis une ligne de `path.start`.
    ///
    /// C'est un fold sur les générateurs : row --fk1--> row' --fk2--> row''
    pub fn follow_path(&self, schema: &Schema, path: &Path, start_row: RowId) -> MigrateResult<RowId> {
        let mut entity = path.start.as_str();
        let mut row = start_row;
        for fk_name in &path.edges {
            let (source, target) = schema.fk(fk_name)?;
            if source != entity {
                return Err(MigrateError::AritySizeMismatch(format!(
                    "path {}: '{}' starts at '{}' but the path is at '{}'",
                    path, fk_name, source, entity
                )));
            }
            row = self.fk_value(entity, row, fk_name)?;
            entity = target;
        }
        Ok(row)
    }

    /// Suit un chemin de FK puis lit un attribut.
    pub fn read_attribute(
        &self,
        schema: &Schema,
        fk_path: &Path,
        attr_name: &str,
        start_row: RowId,
    ) -> MigrateResult<Value> {
        let row = self.follow_path(schema, fk_path, start_row)?;
        let entity = schema.path_target(fk_path)?;
        self.attr_value(entity, row, attr_name).cloned()
    }

    /// Nombre total de lignes dans toutes les entités
    pub fn total_rows(&self) -> usize {
        self.data.values().map(|ed| ed.len()).sum()
    }

    /// Ajoute les lignes de `other` comme lignes SUPPLÉMENTAIRES.
    ///
    /// Résultat : le coproduit (union disjointe) de `self` et `other`.
    /// Chaque ligne de `other` reçoit un nouvel identifiant au-dessus du
    /// maximum existant, et ses FK sont renumérotées en conséquence.
    /// Aucune déduplication. Tout est vérifié avant la première écriture.
    pub fn coproduct_in_place(&mut self, other: &Instance, schema: &Schema) -> MigrateResult<()> {
        if other.schema_name != self.schema_name || schema.name != self.schema_name {
            return Err(MigrateError::SchemaMismatch(format!(
                "cannot merge an instance of '{}' into an instance of '{}' (schema '{}')",
                other.schema_name, self.schema_name, schema.name
            )));
        }

        let mut offsets: BTreeMap<&str, RowId> = BTreeMap::new();
        for entity in other.data.keys() {
            let existing = self.entity(entity)?;
            offsets.insert(entity.as_str(), existing.max_id());
        }
        let mut fk_targets: BTreeMap<&str, RowId> = BTreeMap::new();
        for (entity, data) in &other.data {
            for fks in data.fk_values.values() {
                for fk_name in fks.keys() {
                    if fk_targets.contains_key(fk_name.as_str()) {
                        continue;
                    }
                    let (source, target) = schema.fk(fk_name)?;
                    if source != entity {
                        return Err(MigrateError::AritySizeMismatch(format!(
                            "'{}' is not a foreign key of '{}'",
                            fk_name, entity
                        )));
                    }
                    let offset = offsets.get(target).copied().ok_or_else(|| {
                        MigrateError::SchemaMismatch(format!(
                            "entity '{}' is missing from the merged instance",
                            target
                        ))
                    })?;
                    fk_targets.insert(fk_name.as_str(), offset);
                }
            }
        }

        for (entity, data) in &other.data {
            let offset = offsets[entity.as_str()];
            let target_data = self.entity_mut(entity)?;
            for (&row, attrs) in &data.attribute_values {
                let fks = data.fk_values.get(&row).into_iter().flatten().map(|(fk_name, &target)| {
                    (fk_name.clone(), target + fk_targets[fk_name.as_str()])
                });
                target_data.insert_with_id(row + offset, attrs.clone(), fks);
                if let Some(label) = data.labels.get(&row) {
                    target_data.set_label(row + offset, label.clone());
                }
            }
        }
        Ok(())
    }

    /// Affiche l'instance de manière lisible (pour le debug)
    pub fn display(&self, schema: &Schema) -> String {
        let mut out = format!("instance {} : {} = {{\n", self.name, self.schema_name);

        for (entity_name, entity_data) in &self.data {
            if entity_data.is_empty() {
                continue;
            }
            out.push_str(&format!("  {} ({} lignes):\n", entity_name, entity_data.len()));

            for row_id in entity_data.row_ids() {
                out.push_str(&format!("    [{}]", row_id));

                if let Some(attrs) = entity_data.attribute_values.get(&row_id) {
                    for (attr_name, value) in attrs {
                        out.push_str(&format!(" {}: {},", attr_name, value));
                    }
                }

                if let Some(fks) = entity_data.fk_values.get(&row_id) {
                    for (fk_name, target_id) in fks {
                        let target_entity = schema.fk(fk_name).map_or("?", |(_, target)| target);
                        out.push_str(&format!(" {} -> {}[{}],", fk_name, target_entity, target_id));
                    }
                }

                out.push('\n');
            }
        }

        out.push_str("}\n");
        out
    }
}
