use libsql::{Row, params};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, DbError, now_rfc3339, parse_timestamp};
use crate::forms::types::{Form, FormDefinition, FormSummary, Question};

const FORM_COLUMNS: &str = "id, owner_user_id, airtable_base_id, airtable_table_id, title, \
                            questions_json, created_at, updated_at";

#[derive(Debug, Error)]
pub enum FormError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("form not found: {0}")]
    NotFound(String),
}

#[derive(Clone)]
pub struct FormRepository {
    db: Database,
}

impl FormRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        owner_user_id: &str,
        definition: FormDefinition,
    ) -> Result<Form, FormError> {
        let FormDefinition {
            airtable_base_id,
            airtable_table_id,
            title,
            questions,
        } = definition;

        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let questions_json = serde_json::to_string(&questions)?;

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO forms (
                        id, owner_user_id, airtable_base_id, airtable_table_id, title,
                        questions_json, created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                    RETURNING {FORM_COLUMNS}"
                ),
                params![
                    id.as_str(),
                    owner_user_id,
                    airtable_base_id,
                    airtable_table_id,
                    title,
                    questions_json,
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_form(row),
            None => Err(FormError::NotFound(id)),
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Form, FormError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {FORM_COLUMNS} FROM forms WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_form(row),
            None => Err(FormError::NotFound(id.to_string())),
        }
    }

    /// A form only when it belongs to `owner_user_id`. Other owners' forms read as missing.
    pub async fn get_for_owner(&self, owner_user_id: &str, id: &str) -> Result<Form, FormError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {FORM_COLUMNS} FROM forms WHERE id = ?1 AND owner_user_id = ?2"),
                params![id, owner_user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_form(row),
            None => Err(FormError::NotFound(id.to_string())),
        }
    }

    /// Forms owned by a user, newest first.
    pub async fn list_for_owner(&self, owner_user_id: &str) -> Result<Vec<FormSummary>, FormError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT id, title, airtable_base_id, airtable_table_id, created_at, updated_at
                 FROM forms
                 WHERE owner_user_id = ?1
                 ORDER BY created_at DESC, id DESC",
                params![owner_user_id],
            )
            .await?;

        let mut forms = Vec::new();
        while let Some(row) = rows.next().await? {
            let created_at: String = row.get(4)?;
            let updated_at: String = row.get(5)?;
            forms.push(FormSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                airtable_base_id: row.get(2)?,
                airtable_table_id: row.get(3)?,
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            });
        }
        Ok(forms)
    }
}

fn row_to_form(row: Row) -> Result<Form, FormError> {
    let questions_json: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let questions: Vec<Question> = serde_json::from_str(&questions_json)?;

    Ok(Form {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        airtable_base_id: row.get(2)?,
        airtable_table_id: row.get(3)?,
        title: row.get(4)?,
        questions,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::types::QuestionType;
    use crate::migrations::run_migrations;
    use crate::visibility::{Condition, ConditionOperator, ConditionalRuleSet, LogicOperator};
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup_repo() -> (FormRepository, Database, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join(format!("db_{}.sqlite", Uuid::new_v4()));
        let db = Database::new(&db_path).await.expect("create db");
        run_migrations(&db).await.expect("migrations");
        (FormRepository::new(db.clone()), db, dir)
    }

    async fn seed_user(db: &Database, id: &str) {
        let conn = db.connection().await.expect("conn");
        conn.execute(
            "INSERT INTO users
                 (id, airtable_user_id, tokens_json, last_login_at, created_at, updated_at)
             VALUES (?1, ?2, '{}', ?3, ?3, ?3)",
            params![id, format!("usr_{id}"), now_rfc3339()],
        )
        .await
        .expect("insert user");
    }

    fn definition(title: &str) -> FormDefinition {
        FormDefinition {
            airtable_base_id: "app1".into(),
            airtable_table_id: "tbl1".into(),
            title: title.into(),
            questions: vec![
                Question {
                    question_key: "role".into(),
                    airtable_field_id: "fld1".into(),
                    label: "Role".into(),
                    question_type: QuestionType::SingleSelect,
                    required: true,
                    conditional_rules: None,
                    options: json!({}),
                },
                Question {
                    question_key: "github".into(),
                    airtable_field_id: "fld2".into(),
                    label: "GitHub".into(),
                    question_type: QuestionType::SingleLineText,
                    required: false,
                    conditional_rules: Some(ConditionalRuleSet::new(
                        LogicOperator::Or,
                        vec![Condition::new("role", ConditionOperator::Equals, "Engineer")],
                    )),
                    options: json!({ "placeholder": "username" }),
                },
            ],
        }
    }

    #[tokio::test]
    async fn create_and_fetch_preserves_questions() {
        let (repo, db, _dir) = setup_repo().await;
        seed_user(&db, "u1").await;

        let created = repo.create("u1", definition("Apply")).await.expect("create");
        let fetched = repo.get_by_id(&created.id).await.expect("fetch");

        assert_eq!(fetched, created);
        assert_eq!(fetched.questions, definition("Apply").questions);
        assert_eq!(fetched.owner_user_id, "u1");
    }

    #[tokio::test]
    async fn get_by_id_missing_returns_not_found() {
        let (repo, _db, _dir) = setup_repo().await;
        let err = repo.get_by_id("nope").await.expect_err("missing form");
        assert!(matches!(err, FormError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn owner_scoping_hides_other_users_forms() {
        let (repo, db, _dir) = setup_repo().await;
        seed_user(&db, "u1").await;
        seed_user(&db, "u2").await;

        let form = repo.create("u1", definition("Mine")).await.expect("create");
        repo.create("u2", definition("Theirs")).await.expect("create");

        assert!(repo.get_for_owner("u1", &form.id).await.is_ok());
        assert!(matches!(
            repo.get_for_owner("u2", &form.id).await,
            Err(FormError::NotFound(_))
        ));

        let listed = repo.list_for_owner("u1").await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Mine");
    }

    #[tokio::test]
    async fn list_for_owner_is_newest_first() {
        let (repo, db, _dir) = setup_repo().await;
        seed_user(&db, "u1").await;

        let first = repo.create("u1", definition("First")).await.expect("create");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = repo.create("u1", definition("Second")).await.expect("create");

        let ids: Vec<_> = repo
            .list_for_owner("u1")
            .await
            .expect("list")
            .into_iter()
            .map(|form| form.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn forms_require_an_existing_owner() {
        let (repo, _db, _dir) = setup_repo().await;
        let err = repo
            .create("ghost", definition("Orphan"))
            .await
            .expect_err("foreign key");
        assert!(matches!(err, FormError::Sql(_)));
    }
}
