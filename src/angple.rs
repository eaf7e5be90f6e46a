//! Built-in traffic profile for the Angple backend.
//!
//! Two user classes with equal weight:
//! - `AngpleUser` browses boards, posts, comments and menus, pausing 1-3s
//!   between actions, after checking `/health` once on start.
//! - `HealthCheckUser` polls `/health` every 5-10s.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::task::{RequestSpec, StartupCheck, TaskDef, TemplateError, VariablePools};
use crate::user_class::UserClass;
use crate::wait_time::WaitTime;

pub const HEALTH_PATH: &str = "/health";

/// Both Angple user classes.
pub fn profile() -> Result<Vec<UserClass>, TemplateError> {
    Ok(vec![angple_user()?, health_check_user()?])
}

fn pools() -> VariablePools {
    let mut pools = BTreeMap::new();
    pools.insert("board_id".to_string(), vec!["free".to_string()]);
    pools.insert("id".to_string(), vec!["1".to_string()]);
    pools.insert("post_id".to_string(), vec!["1".to_string()]);
    pools.insert("period".to_string(), vec!["weekly".to_string()]);
    pools
}

/// Typical visitor: reads post lists most, searches least.
pub fn angple_user() -> Result<UserClass, TemplateError> {
    let tasks = vec![
        TaskDef::new(
            "get_posts_list",
            10,
            RequestSpec::get("/api/v2/boards/${board_id}/posts")?
                .with_query("page", "1")
                .with_query("per_page", "20"),
        ),
        TaskDef::new(
            "get_post_detail",
            5,
            RequestSpec::get("/api/v2/boards/${board_id}/posts/${id}")?,
        ),
        TaskDef::new(
            "get_comments",
            3,
            RequestSpec::get("/api/v2/boards/${board_id}/posts/${post_id}/comments")?,
        ),
        TaskDef::new(
            "get_recommended",
            2,
            RequestSpec::get("/api/v2/recommended/${period}")?,
        ),
        TaskDef::new("get_menus", 2, RequestSpec::get("/api/v2/menus")?),
        TaskDef::new(
            "get_sidebar_menus",
            1,
            RequestSpec::get("/api/v2/menus/sidebar")?,
        ),
        TaskDef::new(
            "search_posts",
            1,
            RequestSpec::get("/api/v2/boards/${board_id}/posts/search")?
                .with_query("q", "test")
                .with_query("page", "1"),
        ),
    ];

    Ok(UserClass {
        name: "AngpleUser".to_string(),
        weight: 1,
        fixed_count: None,
        wait_time: WaitTime::between(Duration::from_secs(1), Duration::from_secs(3)),
        on_start: Some(StartupCheck {
            request: RequestSpec::get(HEALTH_PATH)?,
            expected_status: 200,
        }),
        variables: pools(),
        tasks,
    })
}

/// Lightweight monitor hitting only the health endpoint.
pub fn health_check_user() -> Result<UserClass, TemplateError> {
    Ok(UserClass {
        name: "HealthCheckUser".to_string(),
        weight: 1,
        fixed_count: None,
        wait_time: WaitTime::between(Duration::from_secs(5), Duration::from_secs(10)),
        on_start: None,
        variables: VariablePools::new(),
        tasks: vec![TaskDef::new(
            "health_check",
            1,
            RequestSpec::get(HEALTH_PATH)?,
        )],
    })
}
