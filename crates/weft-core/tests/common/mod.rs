#![allow(dead_code)]

use std::sync::Arc;

use weft_abi::{ModelAdapter, SessionOpts};
use weft_core::TokenEditor;
use weft_mock::MockModel;

pub fn model() -> Arc<MockModel> {
    Arc::new(MockModel::new())
}

pub fn editor_for(model: &Arc<MockModel>) -> TokenEditor<MockModel> {
    editor_with_opts(model, &SessionOpts::default())
}

pub fn editor_with_opts(
    model: &Arc<MockModel>,
    opts: &SessionOpts,
) -> TokenEditor<MockModel> {
    let session = model.create_session(opts).unwrap();
    TokenEditor::new(model.clone(), session)
}

pub fn editor() -> TokenEditor<MockModel> {
    editor_for(&model())
}
