#[cfg(test)]
mod tests {
    use crate::snowflake::*;
    use crate::tier::*;
    use crate::types::*;

    #[test]
    fn subdomain_accepts_dns_labels() {
        assert!(validate_subdomain("acme").is_ok());
        assert!(validate_subdomain("acme-2").is_ok());
        assert!(validate_subdomain("a").is_ok());
    }

    #[test]
    fn subdomain_rejects_bad_labels() {
        assert!(validate_subdomain("").is_err());
        assert!(validate_subdomain("-acme").is_err());
        assert!(validate_subdomain("acme-").is_err());
        assert!(validate_subdomain("Acme").is_err());
        assert!(validate_subdomain("ac me").is_err());
        assert!(validate_subdomain(&"a".repeat(64)).is_err());
    }

    #[test]
    fn status_queue_membership() {
        assert!(InstanceStatus::Provisioning.is_queued());
        assert!(InstanceStatus::Destroying.is_queued());
        assert!(!InstanceStatus::Running.is_queued());
        assert!(!InstanceStatus::Failed.is_queued());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            InstanceStatus::Pending,
            InstanceStatus::Provisioning,
            InstanceStatus::Running,
            InstanceStatus::Suspended,
            InstanceStatus::Failed,
            InstanceStatus::Destroying,
            InstanceStatus::Destroyed,
        ] {
            assert_eq!(InstanceStatus::parse(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn destroying_instances_do_not_count_as_live() {
        assert!(InstanceStatus::Running.is_live());
        assert!(InstanceStatus::Failed.is_live());
        assert!(!InstanceStatus::Destroying.is_live());
        assert!(!InstanceStatus::Destroyed.is_live());
    }

    #[test]
    fn feature_tier_gating() {
        assert!(!FeatureTier::Chat.audio_enabled());
        assert!(FeatureTier::Audio.audio_enabled());
        assert!(!FeatureTier::Audio.video_enabled());
        assert!(FeatureTier::Video.audio_enabled());
        assert!(FeatureTier::Video.video_enabled());
    }

    #[test]
    fn video_tier_gets_more_memory_than_chat() {
        let chat = TierProfile::new(FeatureTier::Chat, UserCountTier::Fifty, false);
        let video = TierProfile::new(FeatureTier::Video, UserCountTier::Fifty, false);
        assert!(video.resource_limits().max_memory_mb > chat.resource_limits().max_memory_mb);
    }

    #[test]
    fn memory_bytes_shifts_megabytes() {
        let limits = TierProfile::default().resource_limits();
        assert_eq!(limits.memory_bytes(), (limits.max_memory_mb as i64) * 1024 * 1024);
    }

    #[test]
    fn hd_upgrade_only_matters_on_video() {
        let hd = TierProfile::new(FeatureTier::Video, UserCountTier::Ten, true);
        let flags = hd.feature_flags();
        assert_eq!(flags["hdStreams"], true);

        let audio_hd = TierProfile::new(FeatureTier::Audio, UserCountTier::Ten, true);
        assert_eq!(audio_hd.feature_flags()["hdStreams"], false);
    }

    #[test]
    fn snowflake_ids_are_monotonic() {
        let gen = Snowflake::new(3).unwrap();
        let mut last = 0;
        for _ in 0..4096 {
            let id = gen.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn snowflake_embeds_worker_id() {
        let gen = Snowflake::new(42).unwrap();
        let id = gen.next_id();
        assert_eq!(Snowflake::worker_id_of(id), 42);
    }

    #[test]
    fn snowflake_rejects_out_of_range_worker() {
        assert!(Snowflake::new(1024).is_err());
        assert!(Snowflake::new(WORKER_ID_MAX).is_ok());
    }

    #[test]
    fn user_count_tier_round_trips() {
        for n in [10u32, 50, 100, 500] {
            assert_eq!(UserCountTier::from_max_users(n).unwrap().max_users(), n);
        }
        assert!(UserCountTier::from_max_users(25).is_err());
    }
}
