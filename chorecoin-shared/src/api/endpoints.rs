use super::API_V1_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

pub fn auth_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/login", API_V1_PREFIX))
}
pub fn auth_logout(base: &str) -> String {
    base_join(base, &format!("{}/auth/logout", API_V1_PREFIX))
}
pub fn version(base: &str) -> String {
    base_join(base, &format!("{}/version", API_V1_PREFIX))
}
pub fn me(base: &str) -> String {
    base_join(base, &format!("{}/me", API_V1_PREFIX))
}
pub fn kids(base: &str) -> String {
    base_join(base, &format!("{}/kids", API_V1_PREFIX))
}
pub fn kid(base: &str, kid_id: i32) -> String {
    base_join(base, &format!("{}/kids/{}", API_V1_PREFIX, kid_id))
}
pub fn kid_access(base: &str, kid_id: i32) -> String {
    base_join(base, &format!("{}/kids/{}/access", API_V1_PREFIX, kid_id))
}
pub fn kid_tasks(base: &str, kid_id: i32) -> String {
    base_join(base, &format!("{}/kids/{}/tasks", API_V1_PREFIX, kid_id))
}
pub fn tasks(base: &str) -> String {
    base_join(base, &format!("{}/tasks", API_V1_PREFIX))
}
pub fn task(base: &str, task_id: i32) -> String {
    base_join(base, &format!("{}/tasks/{}", API_V1_PREFIX, task_id))
}
pub fn task_complete(base: &str, task_id: i32) -> String {
    base_join(
        base,
        &format!("{}/tasks/{}/complete", API_V1_PREFIX, task_id),
    )
}
pub fn history(base: &str) -> String {
    base_join(base, &format!("{}/history", API_V1_PREFIX))
}
pub fn rewards(base: &str) -> String {
    base_join(base, &format!("{}/rewards", API_V1_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_without_double_slashes() {
        assert_eq!(
            task_complete("http://localhost:5151/", 9),
            "http://localhost:5151/api/v1/tasks/9/complete"
        );
    }

    #[test]
    fn empty_base_yields_absolute_path() {
        assert_eq!(kid("", 3), "/api/v1/kids/3");
    }
}
