use snafu::Snafu;

pub type Result<T> = std::result::Result<T, SbomError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SbomError {
    #[snafu(display("cannot merge a CycloneDX document with an SPDX document"))]
    CrossFormatMerge,

    #[snafu(display("unrecognised CycloneDX tools shape"))]
    UnknownToolsShape,

    #[snafu(display("document is neither CycloneDX nor SPDX"))]
    UnknownFormat,

    #[snafu(display("SPDX output is not implemented for sbom-for-oci-copy"))]
    SpdxNotImplemented,

    #[snafu(display("sbom-merge needs exactly one cachi2-flavoured input and at least one scanner input, or two or more scanner inputs"))]
    InvalidMergeCombination,

    #[snafu(transparent)]
    Core { source: srcbom_core::CoreError },

    #[snafu(display("{what} is not a JSON object"))]
    NotAnObject { what: String },
}
