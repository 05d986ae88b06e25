//! Relational operator vocabulary and its MongoDB translation table
//!
//! Builder calls express predicates with the operator strings a SQL query
//! builder would accept (`=`, `!=`, `like`, `between`, ...). This module owns
//! the conversion of that vocabulary into MongoDB filter-operator symbols,
//! including the `like` → `$regex` pattern translation.

use bson::{Bson, Regex as BsonRegex};
use remora_common::{RemoraError, Result};

/// Comparison and filter operators accepted by the query builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal (=), compiles to a bare value
    Eq,
    /// Not equal (!= or <>)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// SQL LIKE pattern matching, compiled to an anchored regex
    Like,
    /// Negated LIKE
    NotLike,
    /// Case-insensitive LIKE
    ILike,
    /// Membership in a value list
    In,
    /// Non-membership in a value list
    NotIn,
    /// Field exists (or not, by operand)
    Exists,
    /// BSON type check
    Type,
    /// Modulo check: value is [divisor, remainder]
    Mod,
    /// Array length check
    Size,
    /// Raw regex match
    Regex,
    /// Negated raw regex match
    NotRegex,
    /// At least one array element matches a sub-filter
    ElemMatch,
    /// Array contains all listed values
    All,
    /// Geometry lies within the operand geometry
    GeoWithin,
    /// Geometry intersects the operand geometry
    GeoIntersects,
    /// Proximity search on a 2d/2dsphere index
    Near,
    /// Spherical proximity search
    NearSphere,
}

impl Operator {
    /// Parses an operator from the relational vocabulary.
    ///
    /// Matching is case-insensitive and whitespace-tolerant (`NOT IN`,
    /// `not in`, and `not  in` are all accepted).
    ///
    /// # Errors
    /// Returns `RemoraError::Query` naming the operator when it is not in the
    /// conversion table. This is raised before any store call.
    pub fn parse(op: &str) -> Result<Operator> {
        let normalized = op.trim().to_lowercase();
        let collapsed = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        match collapsed.as_str() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" | "ne" => Ok(Operator::Ne),
            ">" | "gt" => Ok(Operator::Gt),
            ">=" | "gte" => Ok(Operator::Gte),
            "<" | "lt" => Ok(Operator::Lt),
            "<=" | "lte" => Ok(Operator::Lte),
            "like" => Ok(Operator::Like),
            "not like" => Ok(Operator::NotLike),
            "ilike" => Ok(Operator::ILike),
            "in" => Ok(Operator::In),
            "not in" | "nin" => Ok(Operator::NotIn),
            "exists" => Ok(Operator::Exists),
            "type" => Ok(Operator::Type),
            "mod" | "%" => Ok(Operator::Mod),
            "size" => Ok(Operator::Size),
            "regex" | "regexp" => Ok(Operator::Regex),
            "not regex" | "not regexp" => Ok(Operator::NotRegex),
            "elemmatch" => Ok(Operator::ElemMatch),
            "all" => Ok(Operator::All),
            "geowithin" => Ok(Operator::GeoWithin),
            "geointersects" => Ok(Operator::GeoIntersects),
            "near" => Ok(Operator::Near),
            "nearsphere" => Ok(Operator::NearSphere),
            _ => Err(RemoraError::Query(format!("unknown operator: {}", op))),
        }
    }

    /// Returns the MongoDB filter-operator symbol.
    ///
    /// `Eq` has no symbol (equality compiles to a bare value) and the LIKE
    /// family translates through [`like_to_regex`], so those return `None`.
    pub fn mongo_symbol(&self) -> Option<&'static str> {
        match self {
            Operator::Eq | Operator::Like | Operator::NotLike | Operator::ILike => None,
            Operator::Ne => Some("$ne"),
            Operator::Gt => Some("$gt"),
            Operator::Gte => Some("$gte"),
            Operator::Lt => Some("$lt"),
            Operator::Lte => Some("$lte"),
            Operator::In => Some("$in"),
            Operator::NotIn => Some("$nin"),
            Operator::Exists => Some("$exists"),
            Operator::Type => Some("$type"),
            Operator::Mod => Some("$mod"),
            Operator::Size => Some("$size"),
            Operator::Regex => Some("$regex"),
            Operator::NotRegex => Some("$not"),
            Operator::ElemMatch => Some("$elemMatch"),
            Operator::All => Some("$all"),
            Operator::GeoWithin => Some("$geoWithin"),
            Operator::GeoIntersects => Some("$geoIntersects"),
            Operator::Near => Some("$near"),
            Operator::NearSphere => Some("$nearSphere"),
        }
    }

    /// Returns true for operators whose operand is a value list
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn | Operator::All)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::ILike => "ilike",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Exists => "exists",
            Operator::Type => "type",
            Operator::Mod => "mod",
            Operator::Size => "size",
            Operator::Regex => "regex",
            Operator::NotRegex => "not regex",
            Operator::ElemMatch => "elemMatch",
            Operator::All => "all",
            Operator::GeoWithin => "geoWithin",
            Operator::GeoIntersects => "geoIntersects",
            Operator::Near => "near",
            Operator::NearSphere => "nearSphere",
        };
        write!(f, "{}", s)
    }
}

/// Translates a SQL LIKE pattern into a BSON regular expression.
///
/// `%` becomes `.*` and `_` becomes `.`; every other regex metacharacter in
/// the pattern is escaped literally. The regex is anchored with `^` / `$`
/// only when the pattern has no leading / trailing `%`, so `%spider%man%`
/// matches anywhere while `spider` requires a full-string match.
///
/// Matching is case-sensitive unless `case_insensitive` is set (the `ilike`
/// operator).
pub fn like_to_regex(pattern: &str, case_insensitive: bool) -> Bson {
    let mut body = String::with_capacity(pattern.len() + 8);
    for c in pattern.chars() {
        match c {
            '%' => body.push_str(".*"),
            '_' => body.push('.'),
            // regex metacharacters in the literal portion are escaped
            '.' | '+' | '*' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|'
            | '\\' | '/' => {
                body.push('\\');
                body.push(c);
            }
            _ => body.push(c),
        }
    }

    let mut regex = String::with_capacity(body.len() + 2);
    if !pattern.starts_with('%') {
        regex.push('^');
    }
    regex.push_str(&body);
    if !pattern.ends_with('%') {
        regex.push('$');
    }

    Bson::RegularExpression(BsonRegex {
        pattern: regex,
        options: if case_insensitive { "i".to_string() } else { String::new() },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regex_pattern(bson: &Bson) -> (&str, &str) {
        match bson {
            Bson::RegularExpression(re) => (re.pattern.as_str(), re.options.as_str()),
            other => panic!("expected regex, got {:?}", other),
        }
    }

    // =====================
    // Operator parsing
    // =====================

    #[test]
    fn test_parse_comparison_operators() {
        assert_eq!(Operator::parse("=").unwrap(), Operator::Eq);
        assert_eq!(Operator::parse("!=").unwrap(), Operator::Ne);
        assert_eq!(Operator::parse("<>").unwrap(), Operator::Ne);
        assert_eq!(Operator::parse("<").unwrap(), Operator::Lt);
        assert_eq!(Operator::parse("<=").unwrap(), Operator::Lte);
        assert_eq!(Operator::parse(">").unwrap(), Operator::Gt);
        assert_eq!(Operator::parse(">=").unwrap(), Operator::Gte);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Operator::parse("LIKE").unwrap(), Operator::Like);
        assert_eq!(Operator::parse("Not In").unwrap(), Operator::NotIn);
        assert_eq!(Operator::parse("ELEMMATCH").unwrap(), Operator::ElemMatch);
    }

    #[test]
    fn test_parse_collapses_whitespace() {
        assert_eq!(Operator::parse("  not   like ").unwrap(), Operator::NotLike);
        assert_eq!(Operator::parse("not  regexp").unwrap(), Operator::NotRegex);
    }

    #[test]
    fn test_parse_geospatial_operators() {
        assert_eq!(Operator::parse("geoWithin").unwrap(), Operator::GeoWithin);
        assert_eq!(Operator::parse("geointersects").unwrap(), Operator::GeoIntersects);
        assert_eq!(Operator::parse("near").unwrap(), Operator::Near);
        assert_eq!(Operator::parse("nearSphere").unwrap(), Operator::NearSphere);
    }

    #[test]
    fn test_parse_unknown_operator_names_it() {
        let err = Operator::parse("~=").unwrap_err();
        assert!(err.to_string().contains("~="));
        assert!(err.is_usage_error());
    }

    // =====================
    // Symbol table
    // =====================

    #[test]
    fn test_mongo_symbols() {
        assert_eq!(Operator::Eq.mongo_symbol(), None);
        assert_eq!(Operator::Ne.mongo_symbol(), Some("$ne"));
        assert_eq!(Operator::Lt.mongo_symbol(), Some("$lt"));
        assert_eq!(Operator::Lte.mongo_symbol(), Some("$lte"));
        assert_eq!(Operator::Gt.mongo_symbol(), Some("$gt"));
        assert_eq!(Operator::Gte.mongo_symbol(), Some("$gte"));
        assert_eq!(Operator::In.mongo_symbol(), Some("$in"));
        assert_eq!(Operator::NotIn.mongo_symbol(), Some("$nin"));
        assert_eq!(Operator::Exists.mongo_symbol(), Some("$exists"));
        assert_eq!(Operator::Type.mongo_symbol(), Some("$type"));
        assert_eq!(Operator::Mod.mongo_symbol(), Some("$mod"));
        assert_eq!(Operator::Size.mongo_symbol(), Some("$size"));
        assert_eq!(Operator::ElemMatch.mongo_symbol(), Some("$elemMatch"));
        assert_eq!(Operator::All.mongo_symbol(), Some("$all"));
        assert_eq!(Operator::GeoWithin.mongo_symbol(), Some("$geoWithin"));
    }

    #[test]
    fn test_takes_list() {
        assert!(Operator::In.takes_list());
        assert!(Operator::NotIn.takes_list());
        assert!(Operator::All.takes_list());
        assert!(!Operator::Eq.takes_list());
        assert!(!Operator::Gt.takes_list());
    }

    // =====================
    // LIKE translation
    // =====================

    #[test]
    fn test_like_interior_wildcards_unanchored() {
        let re = like_to_regex("%spider%man%", false);
        let (pattern, options) = regex_pattern(&re);
        assert_eq!(pattern, ".*spider.*man.*");
        assert_eq!(options, "");
    }

    #[test]
    fn test_like_no_wildcards_fully_anchored() {
        let re = like_to_regex("spider", false);
        let (pattern, _) = regex_pattern(&re);
        assert_eq!(pattern, "^spider$");
    }

    #[test]
    fn test_like_prefix_pattern() {
        let re = like_to_regex("spider%", false);
        let (pattern, _) = regex_pattern(&re);
        assert_eq!(pattern, "^spider.*");
    }

    #[test]
    fn test_like_suffix_pattern() {
        let re = like_to_regex("%man", false);
        let (pattern, _) = regex_pattern(&re);
        assert_eq!(pattern, ".*man$");
    }

    #[test]
    fn test_like_single_char_wildcard() {
        let re = like_to_regex("sp_der", false);
        let (pattern, _) = regex_pattern(&re);
        assert_eq!(pattern, "^sp.der$");
    }

    #[test]
    fn test_like_escapes_metacharacters() {
        let re = like_to_regex("10.5% (approx)", false);
        let (pattern, _) = regex_pattern(&re);
        assert_eq!(pattern, "^10\\.5.* \\(approx\\)$");
    }

    #[test]
    fn test_ilike_sets_flag() {
        let re = like_to_regex("%Spider%", true);
        let (pattern, options) = regex_pattern(&re);
        assert_eq!(pattern, ".*Spider.*");
        assert_eq!(options, "i");
    }
}
