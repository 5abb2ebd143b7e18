use diesel::prelude::*;

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::signals)]
pub struct NewSignal<'a> {
    pub source: &'a str,
    pub title: &'a str,
    pub url: &'a str,
    pub published_at: String,
    pub fetched_at: String,
    pub raw_excerpt: Option<&'a str>,
    pub summary: Option<&'a str>,
    pub tags_json: Option<String>,
    pub priority: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::signals)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StoredSignal {
    pub id: i64,
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: String,
    pub fetched_at: String,
    pub raw_excerpt: Option<String>,
    pub summary: Option<String>,
    pub tags_json: Option<String>,
    pub priority: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::alerts)]
pub struct NewAlert<'a> {
    pub created_at: String,
    pub alert_type: &'a str,
    pub title: &'a str,
    pub url: Option<&'a str>,
    pub delivered_channels_json: Option<String>,
    pub dedup_key: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::alerts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StoredAlert {
    pub id: i64,
    pub created_at: String,
    pub alert_type: String,
    pub title: String,
    pub url: Option<String>,
    pub delivered_channels_json: Option<String>,
    pub dedup_key: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::digests)]
pub struct NewDigest<'a> {
    pub sent_at: String,
    pub digest_type: &'a str,
    pub body_markdown: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::digests)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StoredDigest {
    pub id: i64,
    pub sent_at: String,
    pub digest_type: String,
    pub body_markdown: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::errors)]
pub struct NewErrorRecord<'a> {
    pub ts: String,
    pub module: &'a str,
    pub message: &'a str,
    pub details_json: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::errors)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StoredErrorRecord {
    pub id: i64,
    pub ts: String,
    pub module: String,
    pub message: String,
    pub details_json: Option<String>,
}
