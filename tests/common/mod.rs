#![allow(dead_code)]

use std::fs;
use std::path::Path;

use chrono::{Datelike, Days, NaiveDate, Weekday};

pub const STORES: [i64; 2] = [1, 2];
pub const FAMILY: &str = "GROCERY I";
pub const DAYS: u64 = 100;

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 3, 1).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Sales for one store/day; store 2 sells nothing every fifth day.
pub fn sales_value(store: i64, day: u64) -> f64 {
    if store == 2 && day % 5 == 0 {
        0.0
    } else {
        (store * 10) as f64 + (day % 13) as f64 + 0.5
    }
}

/// Writes all six sources for two stores and one family over `DAYS` days.
/// The price series starts two months earlier so its trailing statistics
/// are defined on every primary date.
pub fn write_fixture(dir: &Path) {
    fs::create_dir_all(dir).unwrap();

    let mut train = String::from("id,date,store_nbr,family,sales,onpromotion\n");
    let mut id = 0;
    for day in 0..DAYS {
        let d = start_date() + Days::new(day);
        for store in STORES {
            train.push_str(&format!(
                "{id},{d},{store},{FAMILY},{},{}\n",
                sales_value(store, day),
                day % 3
            ));
            id += 1;
        }
    }
    // An exact duplicate key, which cleaning must drop.
    train.push_str(&format!("{id},{},1,{FAMILY},999.0,0\n", start_date()));
    fs::write(dir.join("train.csv"), train).unwrap();

    let mut test = String::from("id,date,store_nbr,family,onpromotion\n");
    for day in 0..16u64 {
        let d = start_date() + Days::new(DAYS + day);
        for store in STORES {
            test.push_str(&format!("{id},{d},{store},{FAMILY},0\n"));
            id += 1;
        }
    }
    fs::write(dir.join("test.csv"), test).unwrap();

    fs::write(
        dir.join("stores.csv"),
        "store_nbr,city,state,type,cluster\n1,Quito,Pichincha,D,13\n2,Guayaquil,Guayas,B,6\n",
    )
    .unwrap();

    let mut oil = String::from("date,dcoilwtico\n");
    let mut d = date(2016, 1, 1);
    let mut i = 0;
    while d <= date(2016, 6, 30) {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            if i % 11 == 4 {
                oil.push_str(&format!("{d},\n"));
            } else {
                oil.push_str(&format!("{d},{:.2}\n", 30.0 + (i % 17) as f64));
            }
            i += 1;
        }
        d = d.succ_opt().unwrap();
    }
    fs::write(dir.join("oil.csv"), oil).unwrap();

    fs::write(
        dir.join("holidays_events.csv"),
        "date,type,locale,locale_name,description,transferred\n\
         2016-04-10,Holiday,National,Ecuador,Fiesta,False\n\
         2016-04-10,Event,National,Ecuador,Otra fiesta,False\n\
         2016-04-20,Holiday,Local,Quito,Fundacion,False\n\
         2016-05-01,Holiday,National,Ecuador,Trabajo,True\n",
    )
    .unwrap();

    let mut transactions = String::from("date,store_nbr,transactions\n");
    for day in 0..DAYS {
        let d = start_date() + Days::new(day);
        for store in STORES {
            transactions.push_str(&format!("{d},{store},{}\n", 1000 + day * store as u64));
        }
    }
    fs::write(dir.join("transactions.csv"), transactions).unwrap();
}
