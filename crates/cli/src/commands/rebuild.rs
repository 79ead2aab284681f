//! Rebuild client commands

use anyhow::Result;
use futures::{StreamExt, pin_mut};

use crate::{
  client::ApiClient,
  format::{format_run, format_status},
};

/// List projections registered on the node
pub async fn cmd_projections(client: &ApiClient, json: bool) -> Result<()> {
  let projections = client.projections().await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&projections)?);
    return Ok(());
  }

  if projections.is_empty() {
    println!("No projections registered");
    return Ok(());
  }
  for name in projections {
    println!("{}", name);
  }
  Ok(())
}

/// Request a rebuild
pub async fn cmd_run(client: &ApiClient, projections: &[String], all: bool, json: bool) -> Result<()> {
  let projections = if all {
    client.projections().await?
  } else {
    projections.to_vec()
  };

  let response = client.run(&projections).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&response)?);
  } else {
    println!("{}", format_run(&response));
  }
  Ok(())
}

/// Show the current status, or follow it
pub async fn cmd_status(client: &ApiClient, watch: bool, json: bool) -> Result<()> {
  if !watch {
    let status = client.status().await?;
    if json {
      println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
      println!("{}", format_status(&status));
    }
    return Ok(());
  }

  let updates = client.watch().await?;
  pin_mut!(updates);

  while let Some(status) = updates.next().await {
    let status = status?;
    if json {
      println!("{}", serde_json::to_string(&status)?);
    } else {
      println!("{}", format_status(&status));
    }
  }
  Ok(())
}
