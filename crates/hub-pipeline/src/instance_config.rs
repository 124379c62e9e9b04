use hub_config::HubConfig;
use hub_domain::TierProfile;
use hub_store::{InstanceInfrastructure, ManagedInstance};
use serde_json::{json, Value};

/// Connection string for the instance's own database: same host as the
/// maintenance URL, instance role and database substituted in.
pub fn instance_db_url(maintenance_url: &str, db_name: &str, password: &str) -> String {
    let (scheme, rest) = maintenance_url
        .split_once("://")
        .unwrap_or(("postgres", maintenance_url));
    // Strip hub userinfo, keep host[:port].
    let after_auth = rest.rsplit_once('@').map(|(_, host)| host).unwrap_or(rest);
    let host = after_auth.split(['/', '?']).next().unwrap_or(after_auth);
    format!("{scheme}://{db_name}:{password}@{host}/{db_name}")
}

/// Render the configuration document delivered to the instance container
/// through the engine secret.
///
/// `bootstrap_token` is the one-time plaintext included only in the
/// delivered copy; the snapshot persisted to the config table passes None.
pub fn render(
    instance: &ManagedInstance,
    infra: &InstanceInfrastructure,
    tier: TierProfile,
    config: &HubConfig,
    bootstrap_token: Option<&str>,
) -> Value {
    let domain = &instance.domain;
    let limits = tier.resource_limits();

    let mut doc = json!({
        "database": {
            "connectionString": instance_db_url(
                &config.maintenance_database_url,
                &infra.db_name,
                &infra.db_password,
            ),
        },
        "redis": {
            "connectionString": format!("{}/{}", config.redis_url.trim_end_matches('/'), infra.redis_db),
            "channelPrefix": instance.subdomain(),
        },
        "jwt": {
            "issuer": format!("https://{domain}"),
            "audience": domain,
        },
        "storage": {
            "endpoint": config.object_store.endpoint,
            "accessKey": infra.storage_access_key,
            "secretKey": infra.storage_secret_key,
            "bucket": config.bucket_name(instance.subdomain()),
            "useSsl": config.object_store.use_ssl,
        },
        "livekit": {
            "host": config.livekit_host,
            "apiKey": infra.media_api_key,
            "apiSecret": infra.media_secret_key,
        },
        "cors": {
            "allowedOrigins": [format!("https://{domain}")],
        },
        "instance": {
            "domain": domain,
            "name": instance.display_name,
        },
        "snowflake": {
            "workerId": instance.worker_id.unwrap_or(0),
        },
        "email": {
            "smtpHost": config.email.smtp_host,
            "smtpPort": config.email.smtp_port,
            "smtpUsername": config.email.smtp_username,
            "smtpPassword": config.email.smtp_password,
            "fromAddress": config.email.from_address,
        },
        "rateLimiting": {
            "windowSecs": config.rate_limiting.window_secs,
            "maxRequests": config.rate_limiting.max_requests,
            "authWindowSecs": config.rate_limiting.auth_window_secs,
            "authMaxRequests": config.rate_limiting.auth_max_requests,
        },
        "auth": {
            "bcryptWorkFactor": config.bcrypt_work_factor,
        },
        "encryption": {
            "kek": infra.instance_kek,
        },
        "outbox": {
            "pollIntervalSecs": 5,
            "batchSize": 100,
        },
        "tier": {
            "flags": tier.feature_flags(),
            "maxMemoryMb": limits.max_memory_mb,
            "maxCpuPercent": limits.max_cpu_percent,
            "maxUploadMb": limits.max_upload_mb,
            "maxUsers": tier.user_count_tier.max_users(),
        },
        "hub": {
            "url": config.public_url,
        },
    });

    if let Some(token) = bootstrap_token {
        doc["hub"]["bootstrapToken"] = json!(token);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_config, test_instance};
    use hub_domain::{FeatureTier, InstanceId, OwnerId, UserCountTier};

    fn infra(instance_id: InstanceId) -> InstanceInfrastructure {
        InstanceInfrastructure {
            id: 2,
            instance_id,
            container_id: None,
            network_id: None,
            secret_id: None,
            proxy_route_id: None,
            db_name: "xcord_acme".into(),
            db_password: "dbpw".into(),
            redis_db: 3,
            storage_access_key: "AK".into(),
            storage_secret_key: "SK".into(),
            media_api_key: "MK".into(),
            media_secret_key: "MS".into(),
            bootstrap_token_hash: Some("hash".into()),
            instance_kek: "wrapped-dek".into(),
        }
    }

    #[test]
    fn db_url_substitutes_role_and_database() {
        let url = instance_db_url("postgres://hub:pw@db:5432/hub", "xcord_acme", "s3cret");
        assert_eq!(url, "postgres://xcord_acme:s3cret@db:5432/xcord_acme");
    }

    #[test]
    fn db_url_handles_missing_userinfo() {
        let url = instance_db_url("postgres://db/hub", "xcord_acme", "pw");
        assert_eq!(url, "postgres://xcord_acme:pw@db/xcord_acme");
    }

    #[test]
    fn renders_all_recognized_keys() {
        let id = InstanceId::new(1);
        let mut instance = test_instance(id, "acme.example.com", OwnerId::new(7));
        instance.worker_id = Some(42);
        let config = test_config();
        let tier = TierProfile::new(FeatureTier::Video, UserCountTier::Fifty, true);

        let doc = render(&instance, &infra(id), tier, &config, Some("tok-plain"));

        assert!(doc["database"]["connectionString"]
            .as_str()
            .unwrap()
            .contains("xcord_acme"));
        assert_eq!(doc["redis"]["channelPrefix"], "acme");
        assert_eq!(doc["jwt"]["audience"], "acme.example.com");
        assert_eq!(doc["storage"]["bucket"], "xcord-acme");
        assert_eq!(doc["snowflake"]["workerId"], 42);
        assert_eq!(doc["encryption"]["kek"], "wrapped-dek");
        assert_eq!(doc["tier"]["flags"]["videoEnabled"], true);
        assert_eq!(doc["tier"]["flags"]["hdStreams"], true);
        assert_eq!(doc["hub"]["bootstrapToken"], "tok-plain");
    }

    #[test]
    fn persisted_snapshot_omits_bootstrap_token() {
        let id = InstanceId::new(1);
        let instance = test_instance(id, "acme.example.com", OwnerId::new(7));
        let doc = render(&instance, &infra(id), TierProfile::default(), &test_config(), None);
        assert!(doc["hub"].get("bootstrapToken").is_none());
    }
}
