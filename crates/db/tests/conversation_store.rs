use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use leadbot_core::domain::conversation::{Conversation, UserId};
use leadbot_core::domain::value::{SlotCandidate, SlotInput};
use leadbot_core::slots::SlotId;
use leadbot_db::{
    connect_with_settings, migrations, ConversationRepository, RepositoryError,
    SqlConversationRepository,
};

fn at(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
}

async fn file_backed_repo(dir: &TempDir) -> SqlConversationRepository {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("leadbot.db").display());
    let pool = connect_with_settings(&url, 4, 5).await.expect("connect file pool");
    migrations::run_pending(&pool).await.expect("run migrations");
    SqlConversationRepository::new(pool)
}

#[tokio::test]
async fn concurrent_writers_on_one_version_commit_exactly_once() {
    let dir = TempDir::new().expect("temp dir");
    let repo = Arc::new(file_backed_repo(&dir).await);
    let user = UserId("5215511112222".to_string());

    let version = repo
        .save(&Conversation::new(user.clone(), at("2026-03-02T08:00:00Z"), 50))
        .await
        .expect("insert");
    let snapshot = repo.find(&user).await.expect("find").expect("exists");
    assert_eq!(snapshot.version, version);

    let mut handles = Vec::new();
    for name in ["Ana", "Beto", "Carla", "Diego"] {
        let repo = Arc::clone(&repo);
        let mut candidate = snapshot.clone();
        handles.push(tokio::spawn(async move {
            candidate
                .lead
                .fill(SlotId::FirstName, SlotCandidate::Value(SlotInput::Text(name.to_string())));
            repo.save(&candidate).await
        }));
    }

    let mut committed = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.expect("join writer") {
            Ok(new_version) => {
                assert_eq!(new_version, 2);
                committed += 1;
            }
            Err(RepositoryError::VersionConflict { expected, .. }) => {
                assert_eq!(expected, 1);
                conflicts += 1;
            }
            Err(other) => panic!("unexpected repository error: {other}"),
        }
    }

    assert_eq!(committed, 1);
    assert_eq!(conflicts, 3);

    let stored = repo.find(&user).await.expect("find").expect("exists");
    assert_eq!(stored.version, 2);
    assert!(stored.lead.display(SlotId::FirstName).is_some());
}

#[tokio::test]
async fn conversations_survive_reconnect() {
    let dir = TempDir::new().expect("temp dir");
    let user = UserId("5215533334444".to_string());

    {
        let repo = file_backed_repo(&dir).await;
        let mut conversation = Conversation::new(user.clone(), at("2026-03-02T08:00:00Z"), 50);
        conversation.lead.fill(SlotId::Email, SlotCandidate::NotProvided);
        repo.save(&conversation).await.expect("insert");
    }

    let repo = file_backed_repo(&dir).await;
    let restored = repo.find(&user).await.expect("find").expect("exists");
    assert_eq!(restored.version, 1);
    assert_eq!(
        restored.lead.flatten().get("email").map(String::as_str),
        Some("not_provided")
    );
}
