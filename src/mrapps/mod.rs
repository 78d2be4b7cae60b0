pub mod prefix;

use crate::mr::MRApp;

pub fn get_app(app: String, prefix_len: usize) -> Result<Box<dyn MRApp>, anyhow::Error> {
    match app.as_str() {
        "prefix" => Ok(Box::new(prefix::MinimalPrefix::new(prefix_len))),
        _ => Err(anyhow::anyhow!("Unknown app: {}", app)),
    }
}
