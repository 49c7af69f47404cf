//! Build commands.

use anyhow::Result;
use hookci_core::{Acknowledgement, Build, BuildRequest, DispatchStatus};

use super::ApiClient;

pub async fn trigger(client: &ApiClient, request: BuildRequest) -> Result<()> {
    let ack: Acknowledgement = client.post_json("build", Some(&request)).await?;
    print_ack(&ack);
    Ok(())
}

pub async fn retrigger(client: &ApiClient, build_id: &str) -> Result<()> {
    let ack: Acknowledgement = client
        .post_json::<(), _>(&format!("builds/{}/retrigger", build_id), None)
        .await?;
    print_ack(&ack);
    Ok(())
}

fn print_ack(ack: &Acknowledgement) {
    match ack.status {
        DispatchStatus::Scheduled => println!("Build scheduled"),
        DispatchStatus::Duplicate => println!("Build already exists, not scheduled again"),
    }
    println!("  project: {}", ack.project_id);
    println!("  build:   {}", ack.build_id);
}

pub async fn list(client: &ApiClient, project_id: &str) -> Result<()> {
    let builds: Vec<Build> = client
        .get_json(&format!("projects/{}/builds", project_id))
        .await?;
    if builds.is_empty() {
        println!("No builds");
        return Ok(());
    }
    println!("{:<14} {:<9} {:<24} CREATED", "BUILD", "COMMIT", "BRANCH");
    for build in builds {
        println!(
            "{:<14} {:<9} {:<24} {}",
            build.id.short(),
            build.short_sha(),
            build.branch,
            build.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn logs(client: &ApiClient, id: &str, deploy: bool) -> Result<()> {
    let path = if deploy {
        format!("deploy/logs/{}", id)
    } else {
        format!("build/logs/{}", id)
    };
    print!("{}", client.get_text(&path).await?);
    Ok(())
}
