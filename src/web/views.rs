use askama::Template;
use askama_web::WebTemplate;

use crate::validate::ModelKind;

#[derive(Template, WebTemplate)]
#[template(path = "index.html")]
pub(crate) struct IndexTemplate {
    pub(crate) models: Vec<&'static str>,
    pub(crate) presets: Vec<u32>,
}

/// handles the / GET
pub(crate) async fn index_handler() -> IndexTemplate {
    IndexTemplate {
        models: ModelKind::names().to_vec(),
        presets: vec![512, 768, 1024],
    }
}
