//! Queries that span more than one store

use std::collections::HashSet;
use std::sync::Arc;

use docket_core::{Result, TagId};

use crate::agents::{AgentId, AgentStore};
use crate::guidelines::{Guideline, GuidelineStore};

/// Tag that scopes an entity to one agent
pub fn agent_tag(agent_id: &AgentId) -> TagId {
    TagId::new(format!("agent:{agent_id}"))
}

/// Read-only queries over the agent and guideline stores
#[derive(Clone)]
pub struct EntityQueries {
    agents: Arc<dyn AgentStore>,
    guidelines: Arc<dyn GuidelineStore>,
}

impl EntityQueries {
    /// Queries over these stores
    pub fn new(agents: Arc<dyn AgentStore>, guidelines: Arc<dyn GuidelineStore>) -> Self {
        Self { agents, guidelines }
    }

    /// Guidelines that apply to an agent
    ///
    /// Untagged guidelines apply to every agent. A tagged guideline applies
    /// if it shares a tag with the agent or carries the agent's own
    /// [`agent_tag`]. `NotFound` if the agent does not exist.
    pub async fn find_guidelines_for_agent(&self, agent_id: &AgentId) -> Result<Vec<Guideline>> {
        let agent = self.agents.read_agent(agent_id).await?;

        let mut scope = agent.tags;
        scope.push(agent_tag(agent_id));

        let global = self.guidelines.list_guidelines(Some(&[])).await?;
        let scoped = self.guidelines.list_guidelines(Some(&scope)).await?;

        let mut seen = HashSet::new();
        Ok(global
            .into_iter()
            .chain(scoped)
            .filter(|g| seen.insert(g.id.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentCreateParams, AgentDocumentStore};
    use crate::guidelines::{GuidelineCreateParams, GuidelineDocumentStore};
    use docket_storage::TransientDocumentDatabase;

    struct Fixture {
        agents: Arc<AgentDocumentStore>,
        guidelines: Arc<GuidelineDocumentStore>,
        queries: EntityQueries,
        agent_id: AgentId,
    }

    async fn fixture() -> Fixture {
        let db = TransientDocumentDatabase::new();
        let agents = Arc::new(AgentDocumentStore::open(&db, false).await.unwrap());
        let guidelines = Arc::new(GuidelineDocumentStore::open(&db, false).await.unwrap());
        let agent_id = agents
            .create_agent(AgentCreateParams::new("helper"))
            .await
            .unwrap()
            .id;
        let queries = EntityQueries::new(agents.clone(), guidelines.clone());
        Fixture {
            agents,
            guidelines,
            queries,
            agent_id,
        }
    }

    #[tokio::test]
    async fn test_guideline_sharing_agent_tag_is_returned() {
        let f = fixture().await;
        f.agents
            .upsert_tag(&f.agent_id, &TagId::from("tag_1"), None)
            .await
            .unwrap();

        let first = f
            .guidelines
            .create_guideline(GuidelineCreateParams::new("condition 1", "action 1"))
            .await
            .unwrap();
        let second = f
            .guidelines
            .create_guideline(GuidelineCreateParams::new("condition 2", "action 2"))
            .await
            .unwrap();
        f.guidelines
            .upsert_tag(&first.id, &TagId::from("tag_1"), None)
            .await
            .unwrap();
        f.guidelines
            .upsert_tag(&second.id, &TagId::from("tag_2"), None)
            .await
            .unwrap();

        let found = f.queries.find_guidelines_for_agent(&f.agent_id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, first.id);
    }

    #[tokio::test]
    async fn test_untagged_guideline_is_global() {
        let f = fixture().await;
        let global = f
            .guidelines
            .create_guideline(GuidelineCreateParams::new("condition 1", "action 1"))
            .await
            .unwrap();

        let found = f.queries.find_guidelines_for_agent(&f.agent_id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, global.id);
    }

    #[tokio::test]
    async fn test_unrelated_tag_is_not_returned() {
        let f = fixture().await;
        let first = f
            .guidelines
            .create_guideline(GuidelineCreateParams::new("condition 1", "action 1"))
            .await
            .unwrap();
        let second = f
            .guidelines
            .create_guideline(GuidelineCreateParams::new("condition 2", "action 2"))
            .await
            .unwrap();
        f.guidelines
            .upsert_tag(&first.id, &agent_tag(&f.agent_id), None)
            .await
            .unwrap();
        f.guidelines
            .upsert_tag(&second.id, &TagId::from("tag_2"), None)
            .await
            .unwrap();

        let found = f.queries.find_guidelines_for_agent(&f.agent_id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, first.id);
    }
}
