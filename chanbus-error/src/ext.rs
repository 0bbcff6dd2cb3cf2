use std::{any::Any, error::Error};

use crate::StatusCode;

/// Общий трейт доменных ошибок шины (object-safe).
///
/// Каждая ошибка сообщает свой [`StatusCode`] и отдаёт себя как `Any`,
/// чтобы [`StackError`](crate::StackError) мог восстановить конкретный тип.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус ошибки.
    ///
    /// По умолчанию возвращает [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Возвращает ошибку как [`Any`](std::any::Any),
    /// чтобы можно было выполнить downcast к конкретному типу.
    fn as_any(&self) -> &dyn Any;
}
