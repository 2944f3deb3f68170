//! Entity extraction from question text.
//!
//! Pattern-based recognition of the four entity fields a nutrition question
//! can carry: nutrient, food group, portion, and preparation. Synonym groups
//! cover English and Spanish surface forms and map each to one canonical
//! value, so "lentejas", "lentils", and "lentil" all resolve to `legumes`.
//! Extraction is pure string matching over normalized text and never fails;
//! text that matches nothing yields an empty [`ResolvedEntities`].

use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, MatchKind};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::query::normalize;

/// Entities recognized in one question, canonical values only.
///
/// A field holds a single value for direct questions and a comma-joined
/// list when the question names several distinct values ("lentils or
/// chickpeas" yields `legumes` once, "lentils or cheese" yields
/// `legumes, dairy`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntities {
    pub nutrient: Option<String>,
    pub food_group: Option<String>,
    pub portion: Option<String>,
    pub preparation: Option<String>,
}

impl ResolvedEntities {
    /// Whether no field was recognized.
    pub fn is_empty(&self) -> bool {
        self.nutrient.is_none()
            && self.food_group.is_none()
            && self.portion.is_none()
            && self.preparation.is_none()
    }

    /// Overlay `newer` onto `self`, field by field. A field present in
    /// `newer` replaces the remembered one; absent fields keep the old
    /// value. This is how follow-up turns inherit context.
    pub fn merge_from(&mut self, newer: &ResolvedEntities) {
        if newer.nutrient.is_some() {
            self.nutrient = newer.nutrient.clone();
        }
        if newer.food_group.is_some() {
            self.food_group = newer.food_group.clone();
        }
        if newer.portion.is_some() {
            self.portion = newer.portion.clone();
        }
        if newer.preparation.is_some() {
            self.preparation = newer.preparation.clone();
        }
    }

    /// Field name/value pairs in stable (alphabetical) order.
    ///
    /// Cache key derivation serializes these, so the order must never
    /// depend on extraction order.
    pub fn field_pairs(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("food_group", self.food_group.as_deref()),
            ("nutrient", self.nutrient.as_deref()),
            ("portion", self.portion.as_deref()),
            ("preparation", self.preparation.as_deref()),
        ]
    }

    /// Canonical values present, in field order.
    pub fn values(&self) -> Vec<&str> {
        [
            self.nutrient.as_deref(),
            self.food_group.as_deref(),
            self.portion.as_deref(),
            self.preparation.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Whether any field carries more than one canonical value.
    pub fn has_multiple_values(&self) -> bool {
        self.values().iter().any(|v| v.contains(", "))
    }
}

/// Canonical value plus its EN/ES surface forms, per field.
type SynonymGroup = (&'static str, &'static [&'static str]);

const NUTRIENT_GROUPS: &[SynonymGroup] = &[
    (
        "protein",
        &[
            "protein", "proteins", "proteína", "proteínas", "proteina", "proteinas",
        ],
    ),
    ("iron", &["iron", "hierro"]),
    ("calcium", &["calcium", "calcio"]),
    ("fiber", &["fiber", "fibre", "fibra"]),
    (
        "vitamin c",
        &["vitamin c", "vitamina c", "ascorbic acid", "ácido ascórbico"],
    ),
    ("vitamin d", &["vitamin d", "vitamina d"]),
    (
        "vitamin b12",
        &["vitamin b12", "vitamina b12", "b12", "cobalamin", "cobalamina"],
    ),
    (
        "folate",
        &["folate", "folic acid", "folato", "ácido fólico", "acido folico"],
    ),
    ("fat", &["fat", "fats", "grasa", "grasas", "lipids", "lípidos"]),
    (
        "carbohydrates",
        &[
            "carbohydrate",
            "carbohydrates",
            "carbs",
            "carbohidratos",
            "hidratos de carbono",
        ],
    ),
    ("sodium", &["sodium", "sodio", "salt", "sal"]),
    (
        "sugar",
        &["sugar", "sugars", "azúcar", "azúcares", "azucar", "azucares"],
    ),
    (
        "calories",
        &[
            "calorie", "calories", "kcal", "caloría", "calorías", "caloria", "calorias",
        ],
    ),
    ("zinc", &["zinc"]),
    ("potassium", &["potassium", "potasio"]),
    ("magnesium", &["magnesium", "magnesio"]),
    ("omega-3", &["omega-3", "omega 3", "omega3"]),
    ("cholesterol", &["cholesterol", "colesterol"]),
];

const FOOD_GROUP_GROUPS: &[SynonymGroup] = &[
    (
        "legumes",
        &[
            "legume", "legumes", "legumbre", "legumbres", "lentil", "lentils", "lenteja",
            "lentejas", "chickpea", "chickpeas", "garbanzo", "garbanzos", "bean", "beans",
            "frijol", "frijoles", "soy", "soja", "tofu",
        ],
    ),
    (
        "dairy",
        &[
            "dairy", "lácteos", "lacteos", "milk", "leche", "cheese", "queso", "yogurt", "yogur",
        ],
    ),
    (
        "poultry",
        &["poultry", "chicken", "pollo", "turkey", "pavo", "aves"],
    ),
    (
        "fish",
        &[
            "fish", "pescado", "salmon", "salmón", "tuna", "atún", "atun", "seafood", "mariscos",
        ],
    ),
    (
        "red meat",
        &[
            "red meat", "carne roja", "beef", "res", "pork", "cerdo", "lamb", "cordero",
        ],
    ),
    (
        "grains",
        &[
            "grain", "grains", "cereal", "cereales", "rice", "arroz", "wheat", "trigo", "oats",
            "avena", "bread", "pan", "pasta", "quinoa",
        ],
    ),
    (
        "vegetables",
        &[
            "vegetable",
            "vegetables",
            "verdura",
            "verduras",
            "vegetales",
            "spinach",
            "espinaca",
            "espinacas",
            "broccoli",
            "brócoli",
            "brocoli",
            "carrot",
            "carrots",
            "zanahoria",
            "zanahorias",
        ],
    ),
    (
        "fruit",
        &[
            "fruit", "fruits", "fruta", "frutas", "apple", "manzana", "banana", "plátano",
            "platano", "orange", "naranja", "avocado", "aguacate",
        ],
    ),
    (
        "nuts",
        &[
            "nut", "nuts", "nueces", "almond", "almonds", "almendra", "almendras", "walnut",
            "walnuts", "peanut", "peanuts", "cacahuate", "maní", "seeds", "semillas",
        ],
    ),
    ("eggs", &["egg", "eggs", "huevo", "huevos"]),
];

const PREPARATION_GROUPS: &[SynonymGroup] = &[
    (
        "raw",
        &["raw", "crudo", "cruda", "crudos", "crudas", "fresh", "fresco", "fresca"],
    ),
    (
        "cooked",
        &[
            "cooked", "cocido", "cocida", "cocidos", "cocidas", "cocinado", "cocinada",
        ],
    ),
    (
        "boiled",
        &["boiled", "hervido", "hervida", "hervidos", "hervidas"],
    ),
    (
        "grilled",
        &["grilled", "a la parrilla", "asado", "asada", "a la plancha"],
    ),
    (
        "roasted",
        &["roasted", "baked", "al horno", "horneado", "horneada"],
    ),
    ("fried", &["fried", "frito", "frita", "fritos", "fritas"]),
    ("steamed", &["steamed", "al vapor"]),
    (
        "canned",
        &["canned", "tinned", "enlatado", "enlatada", "en conserva"],
    ),
    (
        "dried",
        &["dried", "seco", "seca", "deshidratado", "deshidratada"],
    ),
];

/// Quantity expressions: a number followed by a unit, or a per-portion form.
static PORTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \bper\s+100\s*g\b | \bpor\s+100\s*g\b |
        \bper\s+serving\b | \bpor\s+porci(?:ón|on)\b |
        \b\d+(?:[.,]\d+)?\s*
        (?:kg|mg|mcg|grams|gramos|gramo|gram|gr|g|ml|l|oz|lb|
           cups|cup|tazas|taza|tbsp|tsp|cucharadas|cucharada|cucharaditas|cucharadita|
           slices|slice|rebanadas|rebanada|pieces|piece|piezas|pieza|
           servings|serving|porciones|porci(?:ón|on)|raciones|raci(?:ón|on))\b",
    )
    .expect("portion regex must compile")
});

/// One field's synonym automaton plus the canonical value per pattern.
struct FieldMatcher {
    matcher: AhoCorasick,
    canonical: Vec<&'static str>,
}

impl FieldMatcher {
    fn build(groups: &[SynonymGroup]) -> Self {
        let mut patterns = Vec::new();
        let mut canonical = Vec::new();
        for (value, surfaces) in groups {
            for surface in *surfaces {
                patterns.push(*surface);
                canonical.push(*value);
            }
        }
        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)
            .expect("entity synonym patterns must compile");
        Self { matcher, canonical }
    }

    /// Distinct canonical values matched in `text`, in order of first
    /// occurrence, joined with ", ". Matches inside larger words are
    /// rejected ("rice" must not fire for "price").
    fn scan(&self, text: &str) -> Option<String> {
        let mut found: Vec<&str> = Vec::new();
        for m in self.matcher.find_iter(text) {
            if !is_word_bounded(text, m.start(), m.end()) {
                continue;
            }
            let value = self.canonical[m.pattern().as_usize()];
            if !found.contains(&value) {
                found.push(value);
            }
        }
        if found.is_empty() {
            None
        } else {
            Some(found.join(", "))
        }
    }
}

pub(crate) fn is_word_bounded(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    before.is_none_or(|c| !c.is_alphanumeric()) && after.is_none_or(|c| !c.is_alphanumeric())
}

/// Pattern-based extractor over the built-in EN/ES synonym groups.
pub struct EntityExtractor {
    nutrient: FieldMatcher,
    food_group: FieldMatcher,
    preparation: FieldMatcher,
}

impl EntityExtractor {
    pub fn new() -> Self {
        Self {
            nutrient: FieldMatcher::build(NUTRIENT_GROUPS),
            food_group: FieldMatcher::build(FOOD_GROUP_GROUPS),
            preparation: FieldMatcher::build(PREPARATION_GROUPS),
        }
    }

    /// Extract entities from raw question text.
    pub fn extract(&self, text: &str) -> ResolvedEntities {
        let text = normalize(text);
        if text.is_empty() {
            return ResolvedEntities::default();
        }

        let portion = {
            let mut found: Vec<&str> = Vec::new();
            for m in PORTION_RE.find_iter(&text) {
                if !found.contains(&m.as_str()) {
                    found.push(m.as_str());
                }
            }
            if found.is_empty() {
                None
            } else {
                Some(found.join(", "))
            }
        };

        ResolvedEntities {
            nutrient: self.nutrient.scan(&text),
            food_group: self.food_group.scan(&text),
            portion,
            preparation: self.preparation.scan(&text),
        }
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> EntityExtractor {
        EntityExtractor::new()
    }

    #[test]
    fn extracts_all_four_fields() {
        let e = extractor().extract("How much protein is in 100 g of cooked lentils?");
        assert_eq!(e.nutrient.as_deref(), Some("protein"));
        assert_eq!(e.food_group.as_deref(), Some("legumes"));
        assert_eq!(e.portion.as_deref(), Some("100 g"));
        assert_eq!(e.preparation.as_deref(), Some("cooked"));
    }

    #[test]
    fn extracts_spanish_surfaces_to_same_canonicals() {
        let e = extractor().extract("¿Cuánta proteína tienen 100 g de lentejas cocidas?");
        assert_eq!(e.nutrient.as_deref(), Some("protein"));
        assert_eq!(e.food_group.as_deref(), Some("legumes"));
        assert_eq!(e.portion.as_deref(), Some("100 g"));
        assert_eq!(e.preparation.as_deref(), Some("cooked"));
    }

    #[test]
    fn unmatched_text_yields_empty_entities() {
        let e = extractor().extract("tell me something interesting");
        assert!(e.is_empty());
        assert!(extractor().extract("").is_empty());
    }

    #[test]
    fn matches_are_word_bounded() {
        // "rice" inside "price" and "pan" inside "pancake" must not fire.
        let e = extractor().extract("what is the price of a pancake");
        assert_eq!(e.food_group, None);
    }

    #[test]
    fn synonyms_of_one_canonical_do_not_duplicate() {
        let e = extractor().extract("lentils or chickpeas");
        assert_eq!(e.food_group.as_deref(), Some("legumes"));
    }

    #[test]
    fn distinct_values_join_with_comma() {
        let e = extractor().extract("more iron: lentils or cheese?");
        assert_eq!(e.food_group.as_deref(), Some("legumes, dairy"));
        assert!(e.has_multiple_values());
    }

    #[test]
    fn portion_variants() {
        assert_eq!(
            extractor().extract("calories per 100 g of rice").portion.as_deref(),
            Some("per 100 g")
        );
        assert_eq!(
            extractor().extract("iron in 2 cups of milk").portion.as_deref(),
            Some("2 cups")
        );
        assert_eq!(
            extractor().extract("protein in 250ml yogurt").portion.as_deref(),
            Some("250ml")
        );
    }

    #[test]
    fn merge_overwrites_only_present_fields() {
        let mut base = extractor().extract("protein in lentils");
        let newer = extractor().extract("and in 100 g of cheese?");
        base.merge_from(&newer);
        assert_eq!(base.nutrient.as_deref(), Some("protein"));
        assert_eq!(base.food_group.as_deref(), Some("dairy"));
        assert_eq!(base.portion.as_deref(), Some("100 g"));
    }

    #[test]
    fn field_pairs_are_alphabetical() {
        let e = extractor().extract("protein in lentils");
        let names: Vec<&str> = e.field_pairs().iter().map(|(k, _)| *k).collect();
        assert_eq!(names, ["food_group", "nutrient", "portion", "preparation"]);
    }

    #[test]
    fn case_and_spacing_are_normalized_before_matching() {
        let e = extractor().extract("  HOW MUCH   Protein  IN LENTILS ");
        assert_eq!(e.nutrient.as_deref(), Some("protein"));
        assert_eq!(e.food_group.as_deref(), Some("legumes"));
    }
}
