use snafu::Snafu;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoreError {
    #[snafu(display("SPDX package carries more than one purl external reference: {id}"))]
    MultiplePurls { id: String },
    #[snafu(display("cachi2 component has no purl: name={name:?} version={version:?}"))]
    NoPurl { name: String, version: String },
    #[snafu(display("invalid image reference {reference:?}: {reason}"))]
    InvalidReference { reference: String, reason: String },
}
