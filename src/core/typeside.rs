// =============================================================================
// TYPESIDE — Les types d'attributs et les valeurs brutes
// =============================================================================
//
// Les attributs d'un schéma pointent vers des "objets-types" (String, Int...).
// Contrairement aux entités, ces objets ne contiennent pas de lignes : ils
// contiennent des VALEURS brutes, qu'aucune migration ne fusionne ni ne crée.
//
// C'est pour ça que Σ échoue (NonFunctorial) quand deux lignes identifiées
// portent des valeurs différentes pour un même attribut : une valeur brute
// ne peut pas être quotientée.
//
// Les comparaisons (`CompOp`) servent aux filtres des diagrammes de jointure
// (les sommets "libres", liés à une valeur plutôt qu'à une table).
//
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

/// Un type d'attribut (générateur d'objet-type du schéma).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseType {
    /// Chaîne de caractères
    String,
    /// Entier signé 64 bits
    Integer,
    /// Flottant 64 bits
    Float,
    /// Booléen
    Boolean,
    /// Type défini par l'utilisateur (ex: Date)
    Custom(std::string::String),
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseType::String => write!(f, "String"),
            BaseType::Integer => write!(f, "Int"),
            BaseType::Float => write!(f, "Float"),
            BaseType::Boolean => write!(f, "Bool"),
            BaseType::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Une valeur brute, image d'une ligne par un attribut.
///
/// L'égalité (`==`) est l'identité de la valeur stockée : deux flottants sont
/// égaux s'ils ont les mêmes bits. NaN est donc égal à lui-même et `0.0`
/// diffère de `-0.0`. Les filtres passent par [`Value::compare`], qui garde
/// la sémantique IEEE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    String(std::string::String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Valeur de type `Custom` : le moteur ne l'interprète pas.
    Opaque(std::string::String),
    Null,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) | (Value::Opaque(a), Value::Opaque(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Opaque(s) => write!(f, "<{}>", s),
            Value::Null => write!(f, "NULL"),
        }
    }
}

impl Value {
    /// La valeur est-elle un habitant du type `ty` ?
    ///
    /// `Null` habite tous les types ; `Opaque` habite les types `Custom`.
    pub fn inhabits(&self, ty: &BaseType) -> bool {
        matches!(
            (self, ty),
            (Value::Null, _)
                | (Value::String(_), BaseType::String)
                | (Value::Integer(_), BaseType::Integer)
                | (Value::Float(_), BaseType::Float)
                | (Value::Boolean(_), BaseType::Boolean)
                | (Value::Opaque(_), BaseType::Custom(_))
        )
    }

    /// Compare deux valeurs avec un opérateur.
    ///
    /// Sémantique SQL pour NULL : rien n'est égal à NULL.
    /// Types incompatibles → faux.
    pub fn compare(&self, op: CompOp, other: &Value) -> bool {
        use std::cmp::Ordering;

        let ordering = match (self, other) {
            (Value::Null, _) | (_, Value::Null) => return op == CompOp::Neq,
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Opaque(a), Value::Opaque(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => match op {
                CompOp::Eq => return a == b,
                CompOp::Neq => return a != b,
                // pas de < > pour les booléens
                _ => return false,
            },
            _ => return false,
        };

        let Some(ordering) = ordering else {
            // NaN
            return op == CompOp::Neq;
        };
        match op {
            CompOp::Eq => ordering == Ordering::Equal,
            CompOp::Neq => ordering != Ordering::Equal,
            CompOp::Lt => ordering == Ordering::Less,
            CompOp::Gt => ordering == Ordering::Greater,
            CompOp::Lte => ordering != Ordering::Greater,
            CompOp::Gte => ordering != Ordering::Less,
        }
    }
}

/// Opérateur de comparaison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompOp {
    Eq,  // =
    Neq, // !=
    Lt,  // <
    Gt,  // >
    Lte, // <=
    Gte, // >=
}

impl fmt::Display for CompOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompOp::Eq => write!(f, "="),
            CompOp::Neq => write!(f, "!="),
            CompOp::Lt => write!(f, "<"),
            CompOp::Gt => write!(f, ">"),
            CompOp::Lte => write!(f, "<="),
            CompOp::Gte => write!(f, ">="),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_identity() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::String("x".into()), Value::Opaque("x".into()));
        // les filtres restent IEEE
        assert!(!Value::Float(f64::NAN).compare(CompOp::Eq, &Value::Float(f64::NAN)));
        assert!(Value::Float(0.0).compare(CompOp::Eq, &Value::Float(-0.0)));
    }

    #[test]
    fn test_inhabits() {
        assert!(Value::String("hello".into()).inhabits(&BaseType::String));
        assert!(Value::Integer(42).inhabits(&BaseType::Integer));
        assert!(!Value::Integer(42).inhabits(&BaseType::String));
        assert!(Value::Null.inhabits(&BaseType::Float));
        assert!(Value::Opaque("2024-01-01".into()).inhabits(&BaseType::Custom("Date".into())));
    }

    #[test]
    fn test_compare_numbers() {
        assert!(Value::Integer(3).compare(CompOp::Lt, &Value::Integer(4)));
        assert!(Value::Integer(4).compare(CompOp::Gte, &Value::Float(4.0)));
        assert!(!Value::Float(1.5).compare(CompOp::Eq, &Value::Integer(1)));
    }

    #[test]
    fn test_compare_null_and_mismatch() {
        assert!(!Value::Null.compare(CompOp::Eq, &Value::Null));
        assert!(Value::Null.compare(CompOp::Neq, &Value::Integer(1)));
        assert!(!Value::String("1".into()).compare(CompOp::Eq, &Value::Integer(1)));
        assert!(!Value::Boolean(true).compare(CompOp::Lt, &Value::Boolean(false)));
    }
}
