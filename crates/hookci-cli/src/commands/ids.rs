//! Offline id computation.

use hookci_core::{build_id, deploy_id, project_id};

pub fn project(org: &str, name: &str) {
    println!("{}", project_id(org, name));
}

pub fn build(org: &str, name: &str, commit: &str) {
    println!("{}", build_id(&project_id(org, name), commit));
}

pub fn deploy(org: &str, name: &str, commit: &str) {
    let project = project_id(org, name);
    println!("{}", deploy_id(&project, &build_id(&project, commit)));
}
