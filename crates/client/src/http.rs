use std::collections::BTreeMap;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use tidyledger_core::{
    DateRange, JournalId, Transaction, TransactionId, TransactionKind,
};

use crate::{
    Account, AccountKind, ClientError, LedgerClient, NewTransaction, RemoteRule, RuleAction,
    TransactionUpdate, UpdateOutcome,
};

/// Remote ledger client: bearer-token auth, `{data, meta.pagination}` JSON
/// envelopes, one transaction split per group.
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        HttpClient {
            http: reqwest::Client::new(),
            base_url,
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    async fn get_page<A: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
        page: u32,
    ) -> Result<Envelope<A>, ClientError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .query(&[("page", page.to_string())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let envelope: Envelope<A> = response.json().await?;
        debug!(path, page, items = envelope.data.len(), "fetched page");
        Ok(envelope)
    }

    /// Fetch every page of a paginated collection.
    async fn get_all<A: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Vec<ApiItem<A>>, ClientError> {
        let first = self.get_page::<A>(path, query, 1).await?;
        let total_pages = first
            .meta
            .and_then(|m| m.pagination)
            .map(|p| p.total_pages)
            .unwrap_or(1);
        let mut items = first.data;
        for page in 2..=total_pages {
            items.extend(self.get_page::<A>(path, query, page).await?.data);
        }
        Ok(items)
    }

    async fn put_update(
        &self,
        id: TransactionId,
        body: &serde_json::Value,
    ) -> Result<UpdateOutcome, ClientError> {
        let response = self
            .http
            .put(self.url(&format!("transactions/{id}")))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(UpdateOutcome::Applied);
        }
        let message = response.text().await.unwrap_or_default();
        // The remote ledger refuses ordinary edits on reconciled
        // transactions with a validation failure naming the flag.
        if status.as_u16() == 422 && message.contains("reconciled") {
            return Ok(UpdateOutcome::ReconciledConflict);
        }
        Err(ClientError::UpdateRejected {
            id,
            message,
            payload: body.to_string(),
        })
    }
}

impl LedgerClient for HttpClient {
    async fn list_transactions(&self, range: DateRange) -> Result<Vec<Transaction>, ClientError> {
        let query = vec![
            ("start".to_string(), range.start.to_string()),
            ("end".to_string(), range.end.to_string()),
            ("type".to_string(), "all".to_string()),
        ];
        let items = self.get_all::<GroupWire>("transactions", &query).await?;
        info!(range = %range, groups = items.len(), "fetched transactions");
        let mut transactions = Vec::with_capacity(items.len());
        for item in items {
            transactions.push(into_transaction(item)?);
        }
        Ok(transactions)
    }

    async fn list_accounts(
        &self,
        kind: Option<AccountKind>,
    ) -> Result<Vec<Account>, ClientError> {
        let mut query = Vec::new();
        if let Some(kind) = kind {
            let name = serde_json::to_value(kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            query.push(("type".to_string(), name));
        }
        let items = self.get_all::<AccountWire>("accounts", &query).await?;
        let mut accounts = Vec::new();
        for item in items {
            let id = parse_id(&item.id)?;
            // Account types outside the modeled set are skipped.
            if let Ok(kind) = serde_json::from_value::<AccountKind>(serde_json::Value::String(
                item.attributes.kind.clone(),
            )) {
                accounts.push(Account {
                    id,
                    name: item.attributes.name,
                    kind,
                });
            }
        }
        Ok(accounts)
    }

    async fn update_transaction(
        &self,
        id: TransactionId,
        update: &TransactionUpdate,
    ) -> Result<UpdateOutcome, ClientError> {
        let mut split = serde_json::Map::new();
        split.insert(
            "transaction_journal_id".to_string(),
            serde_json::Value::String(update.journal_id.to_string()),
        );
        for (field, value) in &update.fields {
            split.insert(field.clone(), value.clone());
        }
        let body = serde_json::json!({
            "apply_rules": update.apply_rules,
            "transactions": [split],
        });
        let outcome = self.put_update(id, &body).await?;
        info!(%id, ?outcome, "pushed transaction update");
        Ok(outcome)
    }

    async fn create_transaction(&self, new: &NewTransaction) -> Result<TransactionId, ClientError> {
        let mut split = serde_json::Map::new();
        split.insert("type".into(), new.kind.clone().into());
        split.insert("date".into(), new.date.clone().into());
        split.insert("amount".into(), new.amount.clone().into());
        split.insert("description".into(), new.description.clone().into());
        for (key, value) in [
            ("source_name", &new.source_name),
            ("destination_name", &new.destination_name),
            ("category_name", &new.category_name),
            ("notes", &new.notes),
            ("external_id", &new.external_id),
        ] {
            if let Some(value) = value {
                split.insert(key.into(), value.clone().into());
            }
        }
        if !new.tags.is_empty() {
            split.insert("tags".into(), serde_json::json!(new.tags));
        }
        let body = serde_json::json!({ "transactions": [split] });
        let response = self
            .http
            .post(self.url("transactions"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let created: Created = response.json().await?;
        let id = parse_id(&created.data.id)?;
        info!(%id, "created transaction");
        Ok(TransactionId(id))
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.url(&format!("transactions/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        info!(%id, "deleted transaction");
        Ok(())
    }

    async fn set_reconciled(
        &self,
        id: TransactionId,
        journal_id: JournalId,
        reconciled: bool,
    ) -> Result<(), ClientError> {
        let body = serde_json::json!({
            "apply_rules": false,
            "transactions": [{
                "transaction_journal_id": journal_id.to_string(),
                "reconciled": reconciled,
            }],
        });
        match self.put_update(id, &body).await? {
            UpdateOutcome::Applied => Ok(()),
            UpdateOutcome::ReconciledConflict => Err(ClientError::UpdateRejected {
                id,
                message: "reconciliation flag update was itself refused".to_string(),
                payload: body.to_string(),
            }),
        }
    }

    async fn find_rule_by_title(&self, title: &str) -> Result<Option<RemoteRule>, ClientError> {
        let items = self.get_all::<RuleWire>("rules", &[]).await?;
        for item in items {
            if item.attributes.title == title {
                return Ok(Some(RemoteRule {
                    id: parse_id(&item.id)?,
                    title: item.attributes.title,
                }));
            }
        }
        Ok(None)
    }

    async fn update_rule_actions(
        &self,
        rule_id: i64,
        actions: &[RuleAction],
    ) -> Result<(), ClientError> {
        let actions: Vec<serde_json::Value> = actions
            .iter()
            .map(|(kind, value)| {
                serde_json::json!({ "type": kind, "value": value, "active": true })
            })
            .collect();
        let body = serde_json::json!({ "actions": actions });
        let response = self
            .http
            .put(self.url(&format!("rules/{rule_id}")))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        info!(rule_id, "reconfigured remote rule actions");
        Ok(())
    }
}

// ── Wire formats ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<A> {
    data: Vec<ApiItem<A>>,
    meta: Option<Meta>,
}

#[derive(Deserialize)]
struct Meta {
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct Pagination {
    total_pages: u32,
}

#[derive(Deserialize)]
struct ApiItem<A> {
    id: String,
    attributes: A,
}

#[derive(Deserialize)]
struct Created {
    data: CreatedItem,
}

#[derive(Deserialize)]
struct CreatedItem {
    id: String,
}

#[derive(Deserialize)]
struct AccountWire {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct RuleWire {
    title: String,
}

#[derive(Deserialize)]
struct GroupWire {
    transactions: Vec<SplitWire>,
}

#[derive(Deserialize)]
struct SplitWire {
    transaction_journal_id: String,
    #[serde(rename = "type")]
    kind: String,
    amount: String,
    date: String,
    description: String,
    source_id: Option<String>,
    source_name: Option<String>,
    destination_id: Option<String>,
    destination_name: Option<String>,
    category_name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    reconciled: bool,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

fn parse_id(raw: &str) -> Result<i64, ClientError> {
    raw.parse::<i64>()
        .map_err(|_| ClientError::Decode(format!("non-numeric id: {raw:?}")))
}

fn parse_api_date(raw: &str) -> Result<chrono::NaiveDate, ClientError> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.date_naive());
    }
    // Some endpoints serve a bare date.
    raw.get(..10)
        .and_then(|d| chrono::NaiveDate::from_str(d).ok())
        .ok_or_else(|| ClientError::Decode(format!("unparseable date: {raw:?}")))
}

fn into_transaction(item: ApiItem<GroupWire>) -> Result<Transaction, ClientError> {
    let id = TransactionId(parse_id(&item.id)?);
    let split = item
        .transactions_first()
        .ok_or_else(|| ClientError::Decode(format!("transaction {id} has no splits")))?;

    let kind = TransactionKind::from_str(&split.kind).map_err(ClientError::Decode)?;
    let amount = split
        .amount
        .parse()
        .map_err(|e| ClientError::Decode(format!("transaction {id}: {e}")))?;
    let extra = split
        .extra
        .iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k.clone(), s.clone())),
            serde_json::Value::Number(n) => Some((k.clone(), n.to_string())),
            serde_json::Value::Bool(b) => Some((k.clone(), b.to_string())),
            _ => None,
        })
        .collect();

    Ok(Transaction {
        id,
        journal_id: JournalId(parse_id(&split.transaction_journal_id)?),
        kind,
        amount,
        date: parse_api_date(&split.date)?,
        description: split.description.clone(),
        source_id: split.source_id.as_deref().and_then(|s| s.parse().ok()),
        source_name: split.source_name.clone(),
        destination_id: split.destination_id.as_deref().and_then(|s| s.parse().ok()),
        destination_name: split.destination_name.clone(),
        category_name: split.category_name.clone(),
        tags: split.tags.iter().cloned().collect(),
        reconciled: split.reconciled,
        extra,
    })
}

impl ApiItem<GroupWire> {
    fn transactions_first(&self) -> Option<&SplitWire> {
        self.attributes.transactions.first()
    }
}
