//! Cover and content handles as views use them, and book downloads.

mod common;

use client_lib::error::{RequestError, ResourceError, INVALID_FILE_MESSAGE};
use common::{book_json, Harness};
use library_core::ports::{HttpResponse, Method};
use library_core::{BookId, ResourceKind};
use serde_json::json;

#[tokio::test]
async fn html_cover_yields_the_placeholder() {
    let h = Harness::new();
    h.login_as(2, "reader02", "reader").await;
    h.binary("/books/42/cover", "text/html", b"<html><body>Server error</body></html>");

    let scope = h.library.resource_scope();
    let handle = scope.acquire(BookId(42), ResourceKind::Cover).await.unwrap();

    assert!(handle.placeholder);
    assert_eq!(handle.url, h.library.config().placeholder_cover);
    assert!(h.library.resources().registry().resolve(&handle.url).is_none());

    let cover_call = h.api.requests().pop().unwrap();
    assert_eq!(cover_call.header("Accept"), Some("image/*"));
    assert_eq!(cover_call.header("Authorization"), Some("Bearer token-reader02"));
}

#[tokio::test]
async fn every_acquired_handle_is_released_once_views_are_gone() {
    let h = Harness::new();
    h.login_as(2, "reader02", "reader").await;
    for id in 1..=4 {
        h.binary(&format!("/books/{}/cover", id), "image/jpeg", b"\xFF\xD8\xFF\xE0");
    }
    h.binary("/books/1/download", "application/pdf", b"%PDF-1.7");
    let registry = h.library.resources().registry().clone();

    {
        let list_view = h.library.resource_scope();
        let detail_view = h.library.resource_scope();
        for id in 1..=4 {
            list_view.acquire(BookId(id), ResourceKind::Cover).await.unwrap();
        }
        detail_view.acquire(BookId(1), ResourceKind::Cover).await.unwrap();
        detail_view.acquire(BookId(1), ResourceKind::Content).await.unwrap();
        detail_view.refresh(BookId(1), ResourceKind::Cover).await.unwrap();

        // The content viewer is toggled off while the views stay mounted.
        assert!(detail_view.release(BookId(1), ResourceKind::Content));
        assert_eq!(registry.live(), 5);
    }

    assert_eq!(registry.created(), 7);
    assert_eq!(registry.revoked(), 7);
    assert_eq!(registry.live(), 0);
}

#[tokio::test]
async fn unavailable_content_reports_an_error_instead_of_a_placeholder() {
    let h = Harness::new();
    h.login_as(2, "reader02", "reader").await;
    h.binary("/books/5/download", "text/html", b"<html/>");

    let scope = h.library.resource_scope();
    let err = scope.acquire(BookId(5), ResourceKind::Content).await.unwrap_err();

    assert_eq!(
        err,
        ResourceError::ContentUnavailable {
            book_id: BookId(5),
            message: INVALID_FILE_MESSAGE.to_string(),
        }
    );
    assert!(scope.handle(BookId(5), ResourceKind::Content).is_none());
}

#[tokio::test]
async fn download_uses_the_disposition_file_name() {
    let h = Harness::new();
    h.login_as(2, "reader02", "reader").await;
    h.api.respond(
        Method::Get,
        "/books/1/download",
        HttpResponse::new(200, &b"%PDF-1.7"[..])
            .with_header("Content-Type", "application/pdf")
            .with_header("Content-Disposition", "attachment; filename=\"Dune - Frank Herbert.pdf\""),
    );

    let download = h.library.download_book(BookId(1)).await.unwrap();

    assert_eq!(download.file_name, "Dune - Frank Herbert.pdf");
    assert_eq!(download.content_type, "application/pdf");
    assert_eq!(&download.bytes[..], b"%PDF-1.7");
    assert_eq!(h.library.resources().registry().created(), 0);
}

#[tokio::test]
async fn download_decodes_an_extended_disposition_name() {
    let h = Harness::new();
    h.login_as(2, "reader02", "reader").await;
    h.api.respond(
        Method::Get,
        "/books/7/download",
        HttpResponse::new(200, &b"%PDF-1.7"[..])
            .with_header("Content-Type", "application/pdf")
            .with_header(
                "Content-Disposition",
                "attachment; filename=\"Les Miserables.pdf\"; filename*=UTF-8''Les%20Mis%C3%A9rables.pdf",
            ),
    );

    let download = h.library.download_book(BookId(7)).await.unwrap();

    assert_eq!(download.file_name, "Les Misérables.pdf");
}

#[tokio::test]
async fn download_falls_back_to_the_book_title() {
    let h = Harness::new();
    h.login_as(2, "reader02", "reader").await;
    h.binary("/books/1/download", "application/pdf", b"%PDF-1.7");
    h.ok(Method::Get, "/books/1", json!({ "success": true, "book": book_json(1, "Dune") }));

    let download = h.library.download_book(BookId(1)).await.unwrap();

    assert_eq!(download.file_name, "Dune.pdf");
}

#[tokio::test]
async fn download_of_the_wrong_type_is_an_invalid_file() {
    let h = Harness::new();
    h.login_as(2, "reader02", "reader").await;
    h.binary("/books/1/download", "application/json", b"{\"success\":false}");

    let err = h.library.download_book(BookId(1)).await.unwrap_err();

    assert!(matches!(err, RequestError::InvalidFileFormat { .. }));
    assert_eq!(h.notifier.last().unwrap().message, INVALID_FILE_MESSAGE);
}
