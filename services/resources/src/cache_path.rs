//! Deterministic derivative paths.
//!
//! The object store is the cache index: a derivative exists when its path
//! exists. Every function here is pure so the same inputs map to the same path
//! across processes and restarts. Directory creation is left to the storage
//! adapters.

/// Root prefix of resized derivatives
pub const CACHE_ROOT: &str = "cache";
/// Root prefix of extracted video frames
pub const VIDEO_PREVIEW_ROOT: &str = "video-previews";
/// Root prefix of rotated video transcodes
pub const VIDEO_ROTATED_ROOT: &str = "video-rotated";
/// Root prefix of upload preview thumbnails
pub const PREVIEW_ROOT: &str = "preview";
/// Root prefix of focal-point thumbnails
pub const THUMBNAIL_ROOT: &str = "thumbnails";
/// File name of the representative video frame
pub const PREVIEW_FRAME_NAME: &str = "preview_frame.jpg";

/// Resource id with separators turned into path segments, so every resource
/// gets its own nested directory
pub fn id_segments(resource_id: &str) -> String {
    resource_id.replace('-', "/")
}

/// Maps `(resource_id, width, height, fit)` to a cache path.
///
/// Callers must not resolve a path for the `0` size sentinel; an unsized request
/// is served from the original and never cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachePathResolver;

impl CachePathResolver {
    pub fn new() -> Self {
        Self
    }

    /// `cache/{id segments}/{width}_{height}[_fit]{extension}`
    pub fn resolve(
        &self,
        resource_id: &str,
        width: u32,
        height: u32,
        fit: bool,
        extension: &str,
    ) -> String {
        let mut path = format!(
            "{CACHE_ROOT}/{}/{width}_{height}",
            id_segments(resource_id)
        );

        if fit {
            path.push_str("_fit");
        }

        path.push_str(extension);
        path
    }

    /// Cache path of a resized video frame, always a JPEG
    pub fn resolve_video_frame(
        &self,
        resource_id: &str,
        width: u32,
        height: u32,
        fit: bool,
    ) -> String {
        self.resolve(resource_id, width, height, fit, ".jpg")
    }

    /// Directory holding the representative frame of a video
    pub fn video_preview_dir(&self, resource_id: &str) -> String {
        format!("{VIDEO_PREVIEW_ROOT}/{}", id_segments(resource_id))
    }

    /// `video-previews/{id segments}/preview_frame.jpg`
    pub fn video_preview_frame(&self, resource_id: &str) -> String {
        format!(
            "{}/{PREVIEW_FRAME_NAME}",
            self.video_preview_dir(resource_id)
        )
    }

    /// `video-rotated/{angle}/{id}.mp4`
    pub fn rotated_video(&self, resource_id: &str, angle: u16) -> String {
        format!("{VIDEO_ROTATED_ROOT}/{angle}/{resource_id}.mp4")
    }

    /// `preview/{width}x{height}/{id}.jpg`
    pub fn preview_thumbnail(&self, resource_id: &str, width: u32, height: u32) -> String {
        format!("{PREVIEW_ROOT}/{width}x{height}/{resource_id}.jpg")
    }

    /// `thumbnails/{thumbnail_id}/{id segments}.jpg`
    pub fn focal_thumbnail(&self, resource_id: &str, thumbnail_id: &str) -> String {
        format!(
            "{THUMBNAIL_ROOT}/{thumbnail_id}/{}.jpg",
            id_segments(resource_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn test_resolve_nests_id_segments() {
        let resolver = CachePathResolver::new();
        assert_eq!(
            resolver.resolve(ID, 300, 200, false, ".png"),
            "cache/550e8400/e29b/41d4/a716/446655440000/300_200.png"
        );
    }

    #[test]
    fn test_resolve_fit_suffix() {
        let resolver = CachePathResolver::new();
        assert_eq!(
            resolver.resolve(ID, 50, 50, true, ".jpg"),
            "cache/550e8400/e29b/41d4/a716/446655440000/50_50_fit.jpg"
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let first = CachePathResolver::new().resolve(ID, 120, 80, true, ".jpeg");
        let second = CachePathResolver::new().resolve(ID, 120, 80, true, ".jpeg");
        assert_eq!(first, second);

        // every parameter participates in the key
        assert_ne!(first, CachePathResolver::new().resolve(ID, 120, 80, false, ".jpeg"));
        assert_ne!(first, CachePathResolver::new().resolve(ID, 80, 120, true, ".jpeg"));
    }

    #[test]
    fn test_id_without_separators_is_kept() {
        let resolver = CachePathResolver::new();
        assert_eq!(
            resolver.resolve("custom", 10, 20, false, ".gif"),
            "cache/custom/10_20.gif"
        );
    }

    #[test]
    fn test_video_paths() {
        let resolver = CachePathResolver::new();
        assert_eq!(
            resolver.video_preview_frame("a-b"),
            "video-previews/a/b/preview_frame.jpg"
        );
        assert_eq!(
            resolver.resolve_video_frame("a-b", 640, 360, false),
            "cache/a/b/640_360.jpg"
        );
        assert_eq!(resolver.rotated_video("a-b", 90), "video-rotated/90/a-b.mp4");
    }

    #[test]
    fn test_thumbnail_paths() {
        let resolver = CachePathResolver::new();
        assert_eq!(
            resolver.preview_thumbnail("a-b", 300, 200),
            "preview/300x200/a-b.jpg"
        );
        assert_eq!(
            resolver.focal_thumbnail("a-b", "square"),
            "thumbnails/square/a/b.jpg"
        );
    }
}
