//! Read-side medication queries

use crate::error::{IngestError, Result};
use crate::models::Medication;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Default page size for [`FindQuery`]
pub const DEFAULT_LIMIT: i64 = 20;

/// Largest page size accepted by [`FindQuery::validate`]
pub const MAX_LIMIT: i64 = 100;

const MEDICATION_COLUMNS: &str =
    "id, drugbank_id, name, description, synonyms, drug_class, indication, imported_at";

/// Column a listing is sorted by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Name,
    Id,
    DrugClass,
}

impl SortField {
    fn column(self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Id => "id",
            SortField::DrugClass => "drug_class",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Paginated, filtered listing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindQuery {
    pub limit: i64,
    pub offset: i64,
    /// Case-insensitive substring of the name
    pub search: Option<String>,
    pub sort_by: SortField,
    pub order: SortOrder,
}

impl Default for FindQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            search: None,
            sort_by: SortField::default(),
            order: SortOrder::default(),
        }
    }
}

impl FindQuery {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(IngestError::Config(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }
        if self.offset < 0 {
            return Err(IngestError::Config(
                "offset cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    fn pattern(&self) -> String {
        contains_pattern(self.search.as_deref().unwrap_or_default())
    }
}

/// One page of results plus the total match count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> Paginated<T> {
    pub fn has_more(&self) -> bool {
        self.offset + (self.items.len() as i64) < self.total
    }
}

/// `ILIKE` pattern matching `needle` anywhere, with wildcards in it escaped
pub fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// List medications whose name contains `query.search`
pub async fn list(db: &PgPool, query: &FindQuery) -> Result<Paginated<Medication>> {
    query.validate()?;
    let pattern = query.pattern();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM medications WHERE name ILIKE $1")
        .bind(&pattern)
        .fetch_one(db)
        .await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
    builder
        .push(MEDICATION_COLUMNS)
        .push(" FROM medications WHERE name ILIKE ")
        .push_bind(&pattern)
        .push(" ORDER BY ")
        .push(query.sort_by.column())
        .push(" ")
        .push(query.order.keyword())
        .push(", id ASC LIMIT ")
        .push_bind(query.limit)
        .push(" OFFSET ")
        .push_bind(query.offset);

    let items = builder
        .build_query_as::<Medication>()
        .fetch_all(db)
        .await?;

    Ok(Paginated {
        items,
        total,
        limit: query.limit,
        offset: query.offset,
    })
}

/// Fetch one medication by id
pub async fn get_details(db: &PgPool, id: i64) -> Result<Medication> {
    let sql = format!("SELECT {} FROM medications WHERE id = $1", MEDICATION_COLUMNS);

    sqlx::query_as::<_, Medication>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| IngestError::NotFound("Medication could not be found!".to_string()))
}

/// Medications mentioning `needle`, best matches first
///
/// Name matches rank above synonym matches, then drug class, then indication.
pub async fn find_matching(db: &PgPool, needle: &str) -> Result<Vec<Medication>> {
    let sql = format!(
        r#"
        SELECT {columns}
        FROM (
            SELECT m.*,
                CASE
                    WHEN m.name ILIKE $1 THEN 1
                    WHEN EXISTS (SELECT 1 FROM unnest(m.synonyms) AS s(synonym) WHERE s.synonym ILIKE $1) THEN 2
                    WHEN m.drug_class ILIKE $1 THEN 3
                    WHEN m.indication ILIKE $1 THEN 4
                END AS priority
            FROM medications m
        ) ranked
        WHERE priority IS NOT NULL
        ORDER BY priority ASC, name ASC, id ASC
        "#,
        columns = MEDICATION_COLUMNS
    );

    let medications = sqlx::query_as::<_, Medication>(&sql)
        .bind(contains_pattern(needle))
        .fetch_all(db)
        .await?;

    Ok(medications)
}
