use crate::error::Result;
use crate::routeros::RouterSession;

/// Find a secret name unique on the router at call time.
///
/// Probes the exact base name first, then `base-1`, `base-2`, ... until
/// a probe comes back empty. Callers must hold the provisioner write
/// lock so no other dispatch creates the same name between the probe
/// and the add.
pub async fn unique_secret_name(session: &dyn RouterSession, base: &str) -> Result<String> {
    if session.find_secrets(base).await?.is_empty() {
        return Ok(base.to_string());
    }

    let mut n: u32 = 1;
    loop {
        let candidate = format!("{}-{}", base, n);
        if session.find_secrets(&candidate).await?.is_empty() {
            return Ok(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::testing::FakeRouter;
    use crate::routeros::RouterTarget;

    #[tokio::test]
    async fn test_no_collision_keeps_base() {
        let router = FakeRouter::new();
        let session = router.open().await.unwrap();
        assert_eq!(unique_secret_name(session.as_ref(), "A").await.unwrap(), "A");
    }

    #[tokio::test]
    async fn test_first_collision_appends_suffix() {
        let router = FakeRouter::new();
        router.seed_secret("A", "10.0.4.1", "");
        let session = router.open().await.unwrap();
        assert_eq!(
            unique_secret_name(session.as_ref(), "A").await.unwrap(),
            "A-1"
        );
    }

    #[tokio::test]
    async fn test_second_collision_increments() {
        let router = FakeRouter::new();
        router.seed_secret("A", "10.0.4.1", "");
        router.seed_secret("A-1", "10.0.4.2", "");
        let session = router.open().await.unwrap();
        assert_eq!(
            unique_secret_name(session.as_ref(), "A").await.unwrap(),
            "A-2"
        );
    }
}
