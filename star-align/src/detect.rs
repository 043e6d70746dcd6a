//! Bright-source detection, used as the asterism matcher's front end.
//!
//! Wraps the SEP (Source Extractor as a Library) C library the same way a
//! quality-metrics pipeline would to measure stars, but keeps only what
//! triangle matching needs: position and flux.

use crate::error::{Error, Result};
use sep_sys as sep;
use std::ffi::{c_int, CStr};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Source {
    pub x: f64,
    pub y: f64,
    pub flux: f32,
}

fn sep_error(status: c_int, context: &str) -> Error {
    let mut errbuf = [0i8; 512];
    let message = unsafe {
        sep::sep_get_errmsg(status, errbuf.as_mut_ptr());
        CStr::from_ptr(errbuf.as_ptr()).to_string_lossy().to_string()
    };
    Error::ResamplingError { index: 0, reason: format!("{context}: {message}") }
}

/// Detects bright sources, returning the `max_sources` brightest by flux.
pub fn detect_bright_sources(data: &[f32], width: usize, height: usize, max_sources: usize) -> Result<Vec<Source>> {
    if width < 3 || height < 3 {
        return Ok(Vec::new());
    }

    let mut image_data = data.to_vec();

    unsafe {
        let sep_img = sep::sep_image {
            data: image_data.as_mut_ptr() as *const std::ffi::c_void,
            noise: std::ptr::null(),
            mask: std::ptr::null(),
            segmap: std::ptr::null(),
            dtype: sep::SEP_TFLOAT as c_int,
            ndtype: 0,
            mdtype: 0,
            sdtype: 0,
            segids: std::ptr::null_mut(),
            idcounts: std::ptr::null_mut(),
            numids: 0,
            w: width as i64,
            h: height as i64,
            noiseval: 0.0,
            noise_type: 0,
            gain: 1.0,
            maskthresh: 0.0,
        };

        let mut bkg: *mut sep::sep_bkg = std::ptr::null_mut();
        let status = sep::sep_background(&sep_img as *const sep::sep_image, 64, 64, 3, 3, 0.0, &mut bkg);
        if status != 0 {
            return Err(sep_error(status, "background estimation"));
        }
        let background = sep::sep_bkg_global(bkg);
        let rms = sep::sep_bkg_globalrms(bkg);
        sep::sep_bkg_free(bkg);

        let thresh = background + 3.0 * rms;
        let mut catalog: *mut sep::sep_catalog = std::ptr::null_mut();
        let status = sep::sep_extract(
            &sep_img as *const sep::sep_image,
            thresh,
            sep::SEP_THRESH_ABS as c_int,
            5,
            std::ptr::null(),
            0,
            0,
            sep::SEP_FILTER_CONV as c_int,
            32,
            0.005,
            1,
            1.0,
            &mut catalog,
        );
        if status != 0 {
            return Err(sep_error(status, "source extraction"));
        }

        let nobj = (*catalog).nobj as usize;
        let mut sources = Vec::with_capacity(nobj);
        for i in 0..nobj {
            let x = *(*catalog).x.add(i);
            let y = *(*catalog).y.add(i);
            let flux = *(*catalog).flux.add(i);
            sources.push(Source { x, y, flux });
        }
        if !catalog.is_null() {
            sep::sep_catalog_free(catalog);
        }

        sources.sort_by(|a, b| b.flux.partial_cmp(&a.flux).unwrap_or(std::cmp::Ordering::Equal));
        sources.truncate(max_sources);
        Ok(sources)
    }
}
