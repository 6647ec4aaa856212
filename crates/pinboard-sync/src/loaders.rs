//! Read-side API for dashboards: one loader per artifact, each returning a
//! table with the documented columns even when nothing was ever written.

use pinboard_core::{ArtifactName, Table};
use pinboard_storage::ArtifactStore;

pub async fn load(store: &ArtifactStore, artifact: ArtifactName) -> Table {
    let mut table = store.read(artifact.as_str()).await;
    table.ensure_columns(artifact.columns());
    table
}

pub async fn load_rankings(store: &ArtifactStore) -> Table {
    load(store, ArtifactName::Rankings).await
}

pub async fn load_team_stats(store: &ArtifactStore) -> Table {
    load(store, ArtifactName::TeamStats).await
}

pub async fn load_individual_stats(store: &ArtifactStore) -> Table {
    load(store, ArtifactName::IndividualStats).await
}

pub async fn load_standings(store: &ArtifactStore) -> Table {
    load(store, ArtifactName::Standings).await
}

pub async fn load_schedule(store: &ArtifactStore) -> Table {
    load(store, ArtifactName::Schedule).await
}

pub async fn load_schools(store: &ArtifactStore) -> Table {
    load(store, ArtifactName::Schools).await
}

pub async fn load_live_scores(store: &ArtifactStore) -> Table {
    load(store, ArtifactName::LiveScores).await
}

pub async fn load_sites(store: &ArtifactStore) -> Table {
    load(store, ArtifactName::Sites).await
}

pub async fn load_site_rankings(store: &ArtifactStore) -> Table {
    load(store, ArtifactName::SiteRankings).await
}

/// `(artifact, last updated or "Never")` for every tracked artifact.
pub async fn freshness(store: &ArtifactStore) -> Vec<(ArtifactName, String)> {
    let mut out = Vec::with_capacity(ArtifactName::ALL.len());
    for artifact in ArtifactName::ALL {
        out.push((artifact, store.last_updated(artifact.as_str()).await));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinboard_core::{Cell, SCHEDULE_COLUMNS, TEAM_STATS_COLUMNS};
    use pinboard_storage::{StorageConfig, NEVER};
    use tempfile::tempdir;

    #[tokio::test]
    async fn loaders_guarantee_documented_columns() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(StorageConfig::local(dir.path()));

        let schedule = load_schedule(&store).await;
        assert!(schedule.is_empty());
        assert_eq!(schedule.columns(), SCHEDULE_COLUMNS);

        let mut partial = Table::empty(&["team"]);
        partial.push_row(vec![Cell::text("Iowa")]).unwrap();
        store.write("team_stats", &partial).await.unwrap();

        let stats = load_team_stats(&store).await;
        assert_eq!(stats.len(), 1);
        for column in TEAM_STATS_COLUMNS {
            assert!(stats.has_column(column), "{column}");
        }
    }

    #[tokio::test]
    async fn freshness_reports_never_for_unwritten_artifacts() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(StorageConfig::local(dir.path()));
        let mut table = Table::empty(&["slug"]);
        table.push_row(vec![Cell::text("iowa")]).unwrap();
        store.write("schools", &table).await.unwrap();

        let report = freshness(&store).await;
        assert_eq!(report.len(), ArtifactName::ALL.len());
        for (artifact, updated) in report {
            if artifact == ArtifactName::Schools {
                assert_ne!(updated, NEVER);
            } else {
                assert_eq!(updated, NEVER);
            }
        }
    }
}
