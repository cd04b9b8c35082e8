//! # Crop Session
//!
//! Macchina a stati della sessione di crop:
//!
//! ```text
//! Closed -> Initializing -> Ready -> (apply | cancel) -> Closed
//! ```
//!
//! Esiste al massimo una sessione attiva: `begin` chiude sempre quella precedente
//! prima di aprirne una nuova.

use super::{CropRect, CropShape};
use crate::error::{OptimizeError, Result};
use crate::queue::RecordId;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

/// Open editor over one record's current output
#[derive(Debug, Clone)]
pub struct CropSession {
    pub record: RecordId,
    pub image: DynamicImage,
    pub source_mime: String,
    pub shape: CropShape,
    pub selection: CropRect,
}

impl CropSession {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[derive(Debug, Default)]
pub enum CropState {
    #[default]
    Closed,
    Initializing {
        record: RecordId,
    },
    Ready(Box<CropSession>),
}

#[derive(Debug, Default)]
pub struct CropController {
    state: CropState,
}

impl CropController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &CropState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, CropState::Closed)
    }

    pub fn active_record(&self) -> Option<&RecordId> {
        match &self.state {
            CropState::Closed => None,
            CropState::Initializing { record } => Some(record),
            CropState::Ready(session) => Some(&session.record),
        }
    }

    /// Start a session for `record`, tearing down any previous one
    pub fn begin(&mut self, record: RecordId) {
        if let Some(previous) = self.active_record() {
            debug!("Closing crop session for {} before opening {}", previous, record);
        }
        self.state = CropState::Initializing { record };
    }

    /// Attach the decoded image once it has loaded
    pub fn attach(&mut self, record: &RecordId, image: DynamicImage, source_mime: &str) -> Result<()> {
        match &self.state {
            CropState::Initializing { record: pending } if pending == record => {}
            _ => {
                return Err(OptimizeError::Crop(format!(
                    "no crop session is initializing for {}",
                    record
                )))
            }
        }
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            self.state = CropState::Closed;
            return Err(OptimizeError::Crop("cannot crop an empty image".to_string()));
        }
        self.state = CropState::Ready(Box::new(CropSession {
            record: record.clone(),
            image,
            source_mime: source_mime.to_string(),
            shape: CropShape::Rectangle,
            selection: CropRect::full(w, h),
        }));
        Ok(())
    }

    fn ready_mut(&mut self) -> Result<&mut CropSession> {
        match &mut self.state {
            CropState::Ready(session) => Ok(session.as_mut()),
            _ => Err(OptimizeError::Crop("crop editor is not ready".to_string())),
        }
    }

    pub fn session(&self) -> Option<&CropSession> {
        match &self.state {
            CropState::Ready(session) => Some(session.as_ref()),
            _ => None,
        }
    }

    /// Switch shape. A circle locks the selection to 1:1.
    pub fn set_shape(&mut self, shape: CropShape) -> Result<()> {
        let session = self.ready_mut()?;
        session.shape = shape;
        if shape == CropShape::Circle {
            session.selection = session.selection.squared();
        }
        Ok(())
    }

    /// Move the selection, clamped to the image and to the active aspect lock
    pub fn set_selection(&mut self, rect: CropRect) -> Result<CropRect> {
        let session = self.ready_mut()?;
        let (w, h) = session.image.dimensions();
        let mut clamped = rect
            .clamp_to(w, h)
            .ok_or_else(|| OptimizeError::Crop(format!("selection lies outside the {}x{} image", w, h)))?;
        if session.shape == CropShape::Circle {
            clamped = clamped.squared();
        }
        session.selection = clamped;
        Ok(clamped)
    }

    /// Close and hand back the ready session for applying
    pub fn take_ready(&mut self) -> Result<CropSession> {
        match std::mem::take(&mut self.state) {
            CropState::Ready(session) => Ok(*session),
            other => {
                self.state = other;
                Err(OptimizeError::Crop("crop editor is not ready".to_string()))
            }
        }
    }

    pub fn cancel(&mut self) {
        self.state = CropState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn image(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(w, h))
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut controller = CropController::new();
        let id = RecordId::from("a");
        assert!(!controller.is_open());

        controller.begin(id.clone());
        assert!(matches!(controller.state(), CropState::Initializing { .. }));
        assert!(controller.set_shape(CropShape::Circle).is_err());

        controller.attach(&id, image(200, 100), "image/jpeg").unwrap();
        assert_eq!(controller.session().unwrap().selection, CropRect::full(200, 100));

        controller.set_shape(CropShape::Circle).unwrap();
        assert_eq!(controller.session().unwrap().selection, CropRect::new(50, 0, 100, 100));

        let session = controller.take_ready().unwrap();
        assert_eq!(session.record, id);
        assert!(!controller.is_open());
    }

    #[test]
    fn test_begin_replaces_previous_session() {
        let mut controller = CropController::new();
        let a = RecordId::from("a");
        let b = RecordId::from("b");
        controller.begin(a.clone());
        controller.attach(&a, image(10, 10), "image/png").unwrap();

        controller.begin(b.clone());
        assert_eq!(controller.active_record(), Some(&b));
        assert!(controller.attach(&a, image(10, 10), "image/png").is_err());
        controller.attach(&b, image(10, 10), "image/png").unwrap();
        assert_eq!(controller.session().unwrap().record, b);
    }

    #[test]
    fn test_selection_clamped_and_locked() {
        let mut controller = CropController::new();
        let id = RecordId::from("a");
        controller.begin(id.clone());
        controller.attach(&id, image(100, 100), "image/jpeg").unwrap();

        let rect = controller.set_selection(CropRect::new(80, 10, 50, 30)).unwrap();
        assert_eq!(rect, CropRect::new(80, 10, 20, 30));

        controller.set_shape(CropShape::Circle).unwrap();
        let rect = controller.set_selection(CropRect::new(0, 0, 60, 20)).unwrap();
        assert_eq!(rect, CropRect::new(20, 0, 20, 20));
        assert!(controller.set_selection(CropRect::new(200, 200, 5, 5)).is_err());
    }

    #[test]
    fn test_cancel_and_take_when_closed() {
        let mut controller = CropController::new();
        assert!(controller.take_ready().is_err());
        controller.begin(RecordId::from("a"));
        assert!(controller.take_ready().is_err());
        assert!(controller.is_open());
        controller.cancel();
        assert!(!controller.is_open());
    }
}
