use std::collections::BTreeMap;

use anyhow::ensure;
use async_trait::async_trait;

use crate::actor::{Actor, MutateOptions, RetrieveOptions};
use crate::connection::Connection;
use crate::core::Result;
use crate::runner::{Requirement, Steps, TestResult};
use crate::values::Interval;

use super::fixtures::Contract;
use super::unique;

const CONTENT_TYPE: &str = "text/plain";
const FIRST: &[u8] = b"first draft";
const SECOND: &[u8] = b"second draft";
const ATTACHMENT: &str = "attachments/terms.pdf";

/// Document revisions are kept apart, their metadata is editable, and
/// uploaded objects are listed on the entity.
pub struct Documents;

#[async_trait]
impl Requirement for Documents {
    fn name(&self) -> &'static str {
        "documents"
    }

    fn register(&self, connection: &Connection) -> Result<()> {
        connection.register::<Contract>()
    }

    async fn verify(&self, actor: &Actor) -> Vec<TestResult> {
        let mut steps = Steps::new(self.name());
        let mut contract = Contract {
            title: unique("terms"),
            term: Interval::years(1),
            ..Contract::default()
        };

        let Some((r1, r2)) = steps
            .step("write-revisions", async {
                actor.mutate(&mut contract, MutateOptions::new()).await?;
                let meta = BTreeMap::from([("author".to_string(), "storecheck".to_string())]);
                let r1 = actor
                    .write_document(&mut contract, CONTENT_TYPE, FIRST, meta)
                    .await?;
                let r2 = actor
                    .write_document(&mut contract, CONTENT_TYPE, SECOND, BTreeMap::new())
                    .await?;
                ensure!(r1 != r2, "second write reused revision {}", r1);
                Ok((r1, r2))
            })
            .await
        else {
            return steps.finish();
        };
        let id = contract.base.id().clone();

        steps
            .step("latest-revision", async {
                let latest = actor.load_document::<Contract>(&id, None).await?;
                ensure!(latest.revision == r2, "latest is {}, expected {}", latest.revision, r2);
                ensure!(latest.data == SECOND, "latest data differs");
                ensure!(latest.content_type == CONTENT_TYPE, "content type: {}", latest.content_type);
                Ok(())
            })
            .await;

        steps
            .step("earlier-revision", async {
                let first = actor.load_document::<Contract>(&id, Some(r1.as_str())).await?;
                ensure!(first.data == FIRST, "revision {} data differs", r1);
                ensure!(
                    first.meta.get("author").map(String::as_str) == Some("storecheck"),
                    "revision meta: {:?}",
                    first.meta
                );
                Ok(())
            })
            .await;

        steps
            .step("revision-list", async {
                let revisions = actor.document_revisions::<Contract>(&id).await?;
                let ids: Vec<&str> = revisions.iter().map(|r| r.revision.as_str()).collect();
                ensure!(ids.contains(&r1.as_str()) && ids.contains(&r2.as_str()), "revisions: {:?}", ids);
                Ok(())
            })
            .await;

        steps
            .step("properties-untouched", async {
                let read: Contract = actor.get(&id, RetrieveOptions::new()).await?;
                ensure!(read.title == contract.title, "title: {}", read.title);
                ensure!(read.term == Interval::years(1), "term: {:?}", read.term);
                Ok(())
            })
            .await;

        steps
            .step("update-revision-meta", async {
                let add = BTreeMap::from([("reviewed".to_string(), "yes".to_string())]);
                let updated = actor
                    .update_revision(&mut contract, &r1, add, vec!["author".to_string()])
                    .await?;
                ensure!(updated.revision == r1, "update returned revision {}", updated.revision);
                ensure!(updated.data == FIRST, "meta update changed the data");
                ensure!(
                    updated.meta.get("reviewed").map(String::as_str) == Some("yes"),
                    "added meta missing: {:?}",
                    updated.meta
                );
                ensure!(!updated.meta.contains_key("author"), "removed meta still present");
                Ok(())
            })
            .await;

        steps
            .step("upload-object", async {
                let body = b"%PDF-1.4 storecheck".to_vec();
                let size = body.len() as u64;
                actor
                    .mutate(
                        &mut contract,
                        MutateOptions::new().select(["title"]).upload(ATTACHMENT, "application/pdf", body),
                    )
                    .await?;

                let options = RetrieveOptions::new().without_properties().with_objects_at([ATTACHMENT]);
                let record = actor.get_record::<Contract>(&id, options).await?;
                let object = record.objects.iter().find(|o| o.path == ATTACHMENT);
                ensure!(
                    object.is_some_and(|o| o.size == size && o.content_type == "application/pdf"),
                    "objects: {:?}",
                    record.objects
                );
                Ok(())
            })
            .await;

        steps.finish()
    }
}
