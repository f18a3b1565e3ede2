//! Temp-file store seeded with two families, shared by unit tests.

use chorecoin_shared::domain::Assignee;

use super::Store;
use super::models::Task;
use crate::server::{KidConfig, ParentConfig, RewardConfig};

pub const PARENT_MUM: i32 = 1;
pub const PARENT_ZED: i32 = 2;
pub const KID_ALICE: i32 = 1;
pub const KID_BOB: i32 = 2;
pub const KID_CAROL: i32 = 3;

pub fn parents() -> Vec<ParentConfig> {
    vec![
        ParentConfig {
            id: PARENT_MUM,
            name: "Mum".into(),
            email: "mum@example.com".into(),
            auth_id: "mum".into(),
        },
        ParentConfig {
            id: PARENT_ZED,
            name: "Zed".into(),
            email: "zed@example.com".into(),
            auth_id: "zed".into(),
        },
    ]
}

pub fn kids() -> Vec<KidConfig> {
    vec![
        KidConfig {
            id: KID_ALICE,
            parent_id: PARENT_MUM,
            name: "Alice".into(),
            currency: 10,
        },
        KidConfig {
            id: KID_BOB,
            parent_id: PARENT_MUM,
            name: "Bob".into(),
            currency: 0,
        },
        KidConfig {
            id: KID_CAROL,
            parent_id: PARENT_ZED,
            name: "Carol".into(),
            currency: 5,
        },
    ]
}

pub fn rewards() -> Vec<RewardConfig> {
    vec![
        RewardConfig {
            id: 1,
            name: "Movie night".into(),
            cost: 50,
        },
        RewardConfig {
            id: 2,
            name: "Sticker".into(),
            cost: 5,
        },
    ]
}

pub struct TestStore {
    pub store: Store,
    _dir: tempfile::TempDir,
}

impl TestStore {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::connect_sqlite(path.to_str().unwrap()).await.unwrap();
        let ts = TestStore { store, _dir: dir };
        ts.reseed().await;
        ts
    }

    pub async fn reseed(&self) {
        self.store
            .seed_from_config(&parents(), &kids(), &rewards())
            .await
            .unwrap();
    }

    /// Creates a single open task for `kid` on behalf of its parent.
    pub async fn create_one(&self, kid: i32, name: &str, reward: i32) -> Task {
        let parent = if kid == KID_CAROL {
            PARENT_ZED
        } else {
            PARENT_MUM
        };
        let mut created = self
            .store
            .create_tasks(parent, Assignee::Kid(kid), name, reward)
            .await
            .unwrap()
            .unwrap();
        created.pop().unwrap()
    }
}
