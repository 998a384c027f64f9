use chrono::Utc;
use document_store::{CollectionPath, Direction, DocumentPath, DocumentStore, Filter, Query};
use model::{
    audit::{AuditAction, AuditEntry},
    identity::CurrentUser,
    WithId,
};

use crate::{
    client::{decode_all, AUDIT_LOG},
    Client, RequestResult,
};

pub fn audit_collection() -> CollectionPath {
    CollectionPath::new(AUDIT_LOG)
}

impl<S> Client<S>
where
    S: DocumentStore,
{
    /// Appends to the audit trail. Best effort: a failure is logged and never
    /// reaches the caller, whose operation already succeeded.
    pub(crate) async fn audit(
        &self,
        action: AuditAction,
        actor: Option<&CurrentUser>,
        subject: &DocumentPath,
        detail: Option<String>,
    ) {
        let entry = AuditEntry {
            action,
            actor: actor.map(|user| user.id.clone()),
            subject: subject.to_string(),
            detail,
            at: Utc::now(),
        };
        let document = match document_store::to_document(&entry) {
            Ok(document) => document,
            Err(why) => {
                log::warn!("could not encode audit entry for {}: {}", subject, why);
                return;
            }
        };
        if let Err(why) = self.store.add(&audit_collection(), document).await {
            log::warn!(
                "could not write audit entry {:?} for {}: {}",
                action,
                subject,
                why
            );
        }
    }

    /// Audit entries of one document, oldest first.
    pub async fn audit_trail(
        &self,
        subject: &DocumentPath,
    ) -> RequestResult<Vec<WithId<AuditEntry>>> {
        let query = Query::new(audit_collection())
            .filter(Filter::eq("subject", subject.to_string()))
            .order_by("at", Direction::Ascending);
        Ok(decode_all(self.store.query(query).await?))
    }
}
