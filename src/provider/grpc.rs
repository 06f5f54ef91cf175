//! Generated types for the v1alpha1 CSI driver provider service.

#[allow(clippy::doc_markdown)]
pub mod v1alpha1 {
    tonic::include_proto!("v1alpha1");
}
