//! Entity kinds, their feed field mappings and record types
//!
//! Every CBS entity the pipeline handles has a fixed, ordered mapping from
//! the property names in the OData feed to the column names used in chunk
//! files and in Postgres. The first column of a mapping is the natural key.

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::error::{IngestError, IngestResult};

/// Storage type of a mapped column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    Text,
    Integer,
}

/// One feed property mapped onto an internal column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Property name inside `<m:properties>`
    pub source: &'static str,
    /// Column name in chunk files and tables
    pub name: &'static str,
    pub column_type: ColumnType,
}

const fn text(source: &'static str, name: &'static str) -> Column {
    Column {
        source,
        name,
        column_type: ColumnType::Text,
    }
}

const fn integer(source: &'static str, name: &'static str) -> Column {
    Column {
        source,
        name,
        column_type: ColumnType::Integer,
    }
}

const REGIONS: &[Column] = &[
    text("Key", "regio_key"),
    text("Title", "regio"),
    text("Description", "omschrijving"),
];

const PERIODS: &[Column] = &[
    text("Key", "datum_key"),
    text("Title", "jaar"),
    text("Description", "omschrijving"),
    text("Status", "status"),
];

const AGES: &[Column] = &[
    text("Key", "leeftijd_key"),
    text("Title", "leeftijd"),
    text("Description", "omschrijving"),
    integer("CategoryGroupID", "categorygroupid"),
];

const GENDERS: &[Column] = &[
    text("Key", "geslacht_key"),
    text("Title", "geslacht"),
    text("Description", "omschrijving"),
];

const MARITAL_STATUSES: &[Column] = &[
    text("Key", "burgst_key"),
    text("Title", "burgerlijkestaat"),
    text("Description", "omschrijving"),
];

const CATEGORY_GROUPS: &[Column] = &[
    integer("ID", "catgroup_key"),
    text("DimensionKey", "dimensionkey"),
    text("Title", "catgroup"),
    text("Description", "omschrijving"),
    integer("ParentID", "parentid"),
];

const POPULATION: &[Column] = &[
    integer("ID", "id"),
    text("Geslacht", "geslacht_key"),
    text("Leeftijd", "leeftijd_key"),
    text("BurgerlijkeStaat", "burgst_key"),
    text("RegioS", "regio_key"),
    text("Perioden", "datum_key"),
    integer("BevolkingOp1Januari_1", "bevolking_1_januari"),
    integer("GemiddeldeBevolking_2", "gemiddelde_bevolking"),
];

const LAND_USE: &[Column] = &[
    integer("ID", "id"),
    text("RegioS", "regio_key"),
    text("Perioden", "datum_key"),
    integer("TotaleOppervlakte_1", "totale_oppervlakte"),
    integer("TotaalVerkeersterrein_2", "totaal_verkeersterrein"),
    integer("Spoorterrein_3", "spoorterrein"),
    integer("Wegverkeersterrein_4", "wegverkeersterrein"),
    integer("Vliegveld_5", "vliegveld"),
    integer("TotaalBebouwdTerrein_6", "totaal_bebouwd_terrein"),
    integer("Woonterrein_7", "woonterrein"),
    integer("TerreinVoorDetailhandelEnHoreca_8", "detailhandel_horeca"),
    integer("TerreinVoorOpenbareVoorzieningen_9", "openbare_voorzieningen"),
    integer("TerreinVoorSociaalCultureleVoorzieningen_10", "sociaal_culturele_voorzieningen"),
    integer("Bedrijventerrein_11", "bedrijventerrein"),
    integer("TotaalSemiBebouwdTerrein_12", "totaal_semi_bebouwd_terrein"),
    integer("TotaalRecreatieterrein_18", "totaal_recreatieterrein"),
    integer("TotaalAgrarischTerrein_24", "totaal_agrarisch_terrein"),
    integer("TotaalBosEnOpenNatuurlijkTerrein_27", "totaal_bos_en_open_natuurlijk_terrein"),
    integer("TotaalBinnenwater_31", "totaal_binnenwater"),
    integer("TotaalBuitenwater_37", "totaal_buitenwater"),
];

/// The eight CBS entities the pipeline knows about. Displays and serializes
/// as its table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Region,
    Period,
    Age,
    Gender,
    MaritalStatus,
    CategoryGroup,
    Population,
    LandUse,
}

impl EntityKind {
    /// Metadata kinds in the order they are synced
    pub const METADATA: [EntityKind; 6] = [
        EntityKind::Region,
        EntityKind::Period,
        EntityKind::Age,
        EntityKind::Gender,
        EntityKind::MaritalStatus,
        EntityKind::CategoryGroup,
    ];

    pub const FACTS: [EntityKind; 2] = [EntityKind::Population, EntityKind::LandUse];

    pub fn is_fact(self) -> bool {
        matches!(self, EntityKind::Population | EntityKind::LandUse)
    }

    /// Feed collection name under the dataset URL
    pub fn endpoint(self) -> &'static str {
        match self {
            EntityKind::Region => "RegioS",
            EntityKind::Period => "Perioden",
            EntityKind::Age => "Leeftijd",
            EntityKind::Gender => "Geslacht",
            EntityKind::MaritalStatus => "BurgerlijkeStaat",
            EntityKind::CategoryGroup => "CategoryGroups",
            EntityKind::Population | EntityKind::LandUse => "TypedDataSet",
        }
    }

    /// Postgres table and chunk directory name
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Region => "regios",
            EntityKind::Period => "perioden",
            EntityKind::Age => "leeftijd",
            EntityKind::Gender => "geslacht",
            EntityKind::MaritalStatus => "burgerlijkestaat",
            EntityKind::CategoryGroup => "categorygroup",
            EntityKind::Population => "bevolking",
            EntityKind::LandUse => "bodemgebruik",
        }
    }

    /// Table name with a leading capital, used in chunk file names
    pub fn file_stem(self) -> String {
        let table = self.table();
        let mut chars = table.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            EntityKind::Region => REGIONS,
            EntityKind::Period => PERIODS,
            EntityKind::Age => AGES,
            EntityKind::Gender => GENDERS,
            EntityKind::MaritalStatus => MARITAL_STATUSES,
            EntityKind::CategoryGroup => CATEGORY_GROUPS,
            EntityKind::Population => POPULATION,
            EntityKind::LandUse => LAND_USE,
        }
    }

    pub fn key_column(self) -> &'static Column {
        &self.columns()[0]
    }

    pub fn column_index(self, name: &str) -> Option<usize> {
        self.columns().iter().position(|c| c.name == name)
    }

    /// Position of `regio_key` in fact rows
    pub fn region_column(self) -> Option<usize> {
        if self.is_fact() {
            self.column_index("regio_key")
        } else {
            None
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl Serialize for EntityKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.table())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [EntityKind::METADATA.as_slice(), EntityKind::FACTS.as_slice()]
            .concat()
            .into_iter()
            .find(|k| k.table().eq_ignore_ascii_case(s))
            .ok_or_else(|| IngestError::Config(format!("unknown dataset '{s}'")))
    }
}

/// A feed entry reduced to the text of its mapped columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatRecord {
    pub kind: EntityKind,
    pub values: Vec<Option<String>>,
}

impl FlatRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.kind
            .column_index(column)
            .and_then(|i| self.values.get(i))
            .and_then(|v| v.as_deref())
    }

    /// Parse each column according to its [`ColumnType`]. The natural key
    /// must be present; other columns may be null.
    pub fn to_typed(&self) -> IngestResult<TypedRecord> {
        let columns = self.kind.columns();
        if self.values.len() != columns.len() {
            return Err(IngestError::invalid_value(
                self.kind.table(),
                format!("expected {} values, got {}", columns.len(), self.values.len()),
            ));
        }

        let values = columns
            .iter()
            .zip(&self.values)
            .map(|(column, raw)| FieldValue::parse(column, raw.as_deref()))
            .collect::<IngestResult<Vec<_>>>()?;

        if values[0] == FieldValue::Null {
            return Err(IngestError::invalid_value(columns[0].name, "natural key is missing"));
        }

        Ok(TypedRecord {
            kind: self.kind,
            values,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Null,
}

impl FieldValue {
    /// Empty text is kept as-is; an empty or blank integer is null.
    /// Region keys like `NL01  ` carry significant trailing spaces, so text
    /// is never trimmed.
    pub fn parse(column: &Column, raw: Option<&str>) -> IngestResult<Self> {
        let Some(raw) = raw else {
            return Ok(FieldValue::Null);
        };
        match column.column_type {
            ColumnType::Text => Ok(FieldValue::Text(raw.to_string())),
            ColumnType::Integer => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(FieldValue::Null);
                }
                trimmed
                    .parse::<i64>()
                    .map(FieldValue::Integer)
                    .map_err(|e| IngestError::invalid_value(column.name, format!("'{raw}': {e}")))
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

/// A record ready for the store, one value per mapped column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedRecord {
    pub kind: EntityKind,
    pub values: Vec<FieldValue>,
}

impl TypedRecord {
    pub fn key(&self) -> &FieldValue {
        &self.values[0]
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.kind.column_index(column).and_then(|i| self.values.get(i))
    }
}

/// Collapse records sharing a natural key, keeping the last one in the
/// position of the first. Postgres refuses an `ON CONFLICT DO UPDATE` that
/// touches the same row twice in one statement.
pub fn dedup_last_wins(records: Vec<TypedRecord>) -> Vec<TypedRecord> {
    let mut positions: HashMap<FieldValue, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<TypedRecord> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(record.key()) {
            Some(&idx) => out[idx] = record,
            None => {
                positions.insert(record.key().clone(), out.len());
                out.push(record);
            },
        }
    }

    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn flat(kind: EntityKind, values: &[Option<&str>]) -> FlatRecord {
        FlatRecord {
            kind,
            values: values.iter().map(|v| v.map(str::to_string)).collect(),
        }
    }

    #[test]
    fn test_every_kind_starts_with_its_key() {
        for kind in EntityKind::METADATA.iter().chain(EntityKind::FACTS.iter()) {
            assert!(!kind.columns().is_empty(), "{kind} has no columns");
            assert!(kind.key_column().name.ends_with("key") || kind.key_column().name == "id");
        }
        assert_eq!(EntityKind::CategoryGroup.key_column().column_type, ColumnType::Integer);
    }

    #[test]
    fn test_region_column_only_for_facts() {
        assert_eq!(EntityKind::Population.region_column(), Some(4));
        assert_eq!(EntityKind::LandUse.region_column(), Some(1));
        assert_eq!(EntityKind::Region.region_column(), None);
    }

    #[test]
    fn test_file_stem_and_parse() {
        assert_eq!(EntityKind::Population.file_stem(), "Bevolking");
        assert_eq!("Bodemgebruik".parse::<EntityKind>().unwrap(), EntityKind::LandUse);
        assert!("gemeentes".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_serializes_as_table_name() {
        assert_eq!(serde_json::to_string(&EntityKind::LandUse).unwrap(), "\"bodemgebruik\"");
        assert_eq!(
            serde_json::to_value([EntityKind::Population, EntityKind::CategoryGroup]).unwrap(),
            serde_json::json!(["bevolking", "categorygroup"])
        );
    }

    #[test]
    fn test_to_typed_parses_integers_and_keeps_text() {
        let record = flat(
            EntityKind::Population,
            &[Some(" 42 "), Some("T001038"), Some("10000"), Some("T001019"), Some("NL01  "), Some("2023JJ00"), Some("17811291"), None],
        );
        let typed = record.to_typed().unwrap();
        assert_eq!(typed.key(), &FieldValue::Integer(42));
        assert_eq!(typed.get("regio_key").unwrap().as_text(), Some("NL01  "));
        assert_eq!(typed.get("bevolking_1_januari").unwrap().as_integer(), Some(17_811_291));
        assert_eq!(typed.get("gemiddelde_bevolking"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_to_typed_rejects_missing_key_and_bad_integer() {
        let no_key = flat(EntityKind::Region, &[None, Some("Amsterdam"), None]);
        assert!(matches!(no_key.to_typed(), Err(IngestError::InvalidValue { column, .. }) if column == "regio_key"));

        let bad = flat(EntityKind::CategoryGroup, &[Some("1"), None, Some("Totaal"), None, Some("x")]);
        assert!(matches!(bad.to_typed(), Err(IngestError::InvalidValue { column, .. }) if column == "parentid"));
    }

    #[test]
    fn test_dedup_keeps_last_in_first_position() {
        let rec = |key: &str, name: &str| TypedRecord {
            kind: EntityKind::Gender,
            values: vec![
                FieldValue::Text(key.into()),
                FieldValue::Text(name.into()),
                FieldValue::Null,
            ],
        };
        let out = dedup_last_wins(vec![rec("3000", "Mannen"), rec("4000", "Vrouwen"), rec("3000", "Man")]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].values[1], FieldValue::Text("Man".into()));
        assert_eq!(out[1].values[1], FieldValue::Text("Vrouwen".into()));
    }
}
