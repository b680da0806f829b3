use thiserror::Error;

use crate::model::{
    BankItemError, CatalogError, ItemCodeError, MediaValidationError, ParseIdError,
    PhaseParseError, ResultError, WeaknessError,
};
use crate::proctor::ExamSessionError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    MediaValidation(#[from] MediaValidationError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    ItemCode(#[from] ItemCodeError),
    #[error(transparent)]
    BankItem(#[from] BankItemError),
    #[error(transparent)]
    Session(#[from] ExamSessionError),
    #[error(transparent)]
    Result(#[from] ResultError),
    #[error(transparent)]
    Weakness(#[from] WeaknessError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
    #[error(transparent)]
    Phase(#[from] PhaseParseError),
}
