pub mod domain;
pub mod ports;

pub use domain::{
    Book, BookDraft, BookFilter, BookId, BookPatch, Category, CategoryDraft, CategoryId,
    CategoryRef, FileRef, FileUpload, Gender, Notice, NoticeLevel, PasswordChange, ProfilePatch,
    Registration, ResourceKind, Role, Route, Session, UserId, UserRecord,
};
pub use ports::{
    FormPart, FormValue, HttpRequest, HttpResponse, HttpTransport, Method, Navigator, Notifier,
    PortError, PortResult, RequestBody, SessionStorage,
};
