use hub_store::{ManagedInstance, ProvisioningEvent};

/// Render the instance summary table.
pub fn render_instances(instances: &[ManagedInstance]) -> String {
    if instances.is_empty() {
        return "No instances.\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&format!(
        "{:<20} {:<32} {:<13} {:>9}  {}\n",
        "ID", "DOMAIN", "STATUS", "WORKER", "CREATED"
    ));
    for instance in instances {
        out.push_str(&format!(
            "{:<20} {:<32} {:<13} {:>9}  {}\n",
            instance.id,
            instance.domain,
            instance.status,
            instance
                .worker_id
                .map(|w| w.to_string())
                .unwrap_or_else(|| "-".to_string()),
            instance.created_at.format("%Y-%m-%d %H:%M:%S"),
        ));
    }
    out
}

/// Render an instance's event log, one line per attempt.
pub fn render_events(events: &[ProvisioningEvent]) -> String {
    let mut out = String::new();
    for event in events {
        let duration = match event.completed_at {
            Some(done) => {
                let ms = (done - event.started_at).num_milliseconds();
                format!("{ms}ms")
            }
            None => "-".to_string(),
        };
        out.push_str(&format!(
            "{} {:<28} {:<8} {:<12} {:>8}  {}\n",
            event.started_at.format("%H:%M:%S"),
            event.step_name,
            event.phase,
            event.status,
            duration,
            event.error_message.as_deref().unwrap_or(""),
        ));
    }
    out
}
