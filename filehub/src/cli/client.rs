use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use client::UploadParams;

pub async fn upload(params: UploadParams) -> ExitCode {
    let file = params.file.display().to_string();
    let result = client::upload_file(&params, |done, total| {
        print!("\r{file}: {done}/{total} chunks");
        std::io::stdout().flush().unwrap_or_default();
    })
    .await;
    println!();
    match result {
        Ok(stored) => {
            println!("stored {} as {} (id {})", stored.filename, stored.path, stored.file_id);
            println!("download url: {}", stored.download_url);
            ExitCode::SUCCESS
        }
        Err(e) => report(&e),
    }
}

pub async fn list(uri: &str, path: Option<&str>, search: Option<&str>) -> ExitCode {
    match client::list_files(uri, path, search).await {
        Ok(nodes) if nodes.is_empty() => {
            println!("no files");
            ExitCode::SUCCESS
        }
        Ok(nodes) => {
            println!("{}", client::tree_table(&nodes));
            ExitCode::SUCCESS
        }
        Err(e) => report(&e),
    }
}

pub async fn stats(uri: &str) -> ExitCode {
    match client::stats(uri).await {
        Ok(stats) => {
            println!("{}", client::stats_table(&stats));
            ExitCode::SUCCESS
        }
        Err(e) => report(&e),
    }
}

pub async fn delete(uri: &str, ids: &[String]) -> ExitCode {
    if let [id] = ids {
        return match client::delete_file(uri, id).await {
            Ok(_) => {
                println!("deleted {id}");
                ExitCode::SUCCESS
            }
            Err(e) => report(&e),
        };
    }
    match client::batch_delete(uri, ids).await {
        Ok(result) => {
            println!("deleted: {}, failed: {}", result.deleted, result.failed);
            for error in &result.errors {
                println!("  {error}");
            }
            if result.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => report(&e),
    }
}

pub async fn download(uri: &str, id: &str, output: Option<&Path>) -> ExitCode {
    match client::download(uri, id, output).await {
        Ok((path, size)) => {
            println!("saved {} ({size} bytes)", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => report(&e),
    }
}

fn report(e: &client::Error) -> ExitCode {
    eprintln!("error: {e}");
    ExitCode::FAILURE
}
